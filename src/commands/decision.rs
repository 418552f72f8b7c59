use chrono::NaiveDate;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::instance_id::InstanceId;
use crate::output::{self, Format};
use crate::store::decisions::{DecisionFilter, NewDecision};

pub fn log(
    coord: &Coordinator,
    id: &InstanceId,
    decision: NewDecision,
    format: Format,
) -> Result<()> {
    let decision = coord.log_decision(id, decision)?;
    output::print_decision(&decision, format)
}

pub fn list(
    coord: &Coordinator,
    category: Option<String>,
    since: Option<NaiveDate>,
    made_by: Option<InstanceId>,
    limit: Option<usize>,
    format: Format,
) -> Result<()> {
    let filter = DecisionFilter {
        category,
        since,
        made_by,
        limit,
    };
    let decisions = coord.list_decisions(&filter)?;
    output::print_decisions(&decisions, format)
}
