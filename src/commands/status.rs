use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::output::{self, Format};

pub fn run(coord: &Coordinator, format: Format) -> Result<()> {
    let report = coord.status()?;
    output::print_status(&report, format)
}
