//! Structural validation of a physical program.
//!
//! Checked here:
//! - every value is registered once, names are unique
//! - every slot is written by at most one step, and only read after it
//! - argument and output names are unique
//! - `End`, when present, is the last step and appears once

use std::collections::HashSet;

use crate::error::PlanError;
use crate::physical::{PhysicalProgram, Step, ValueTable};

pub fn validate(program: &PhysicalProgram) -> Result<(), PlanError> {
    let table = ValueTable::from_decls(program.values.clone())?;

    let mut written = HashSet::new();
    let mut arguments = HashSet::new();
    let mut outputs = HashSet::new();

    for (i, step) in program.steps.iter().enumerate() {
        for value in step.reads() {
            if table.get(value).is_none() {
                return Err(PlanError::UnknownValue(value));
            }
            if !written.contains(&value) {
                return Err(PlanError::ReadBeforeWrite { value, step: i });
            }
        }

        if let Some(value) = step.writes() {
            if table.get(value).is_none() {
                return Err(PlanError::UnknownValue(value));
            }
            if !written.insert(value) {
                return Err(PlanError::MultipleWriters { value, step: i });
            }
        }

        match step {
            Step::RequiredArgument { name, .. } | Step::OptionalArgument { name, .. } => {
                if !arguments.insert(name.as_str()) {
                    return Err(PlanError::DuplicateArgument(name.clone()));
                }
            }
            Step::Output { name, .. } => {
                if !outputs.insert(name.as_str()) {
                    return Err(PlanError::DuplicateOutput(name.clone()));
                }
            }
            Step::End if i + 1 != program.steps.len() => {
                return Err(PlanError::Invalid(format!(
                    "end at step {} is followed by {} more step(s)",
                    i,
                    program.steps.len() - i - 1
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
