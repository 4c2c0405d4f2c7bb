//! YAML (and JSON) program documents.
//!
//! Example:
//! ```yaml
//! name: squares
//! values:
//!   - { id: 0, name: xs, data_type: any }
//! steps:
//!   - step: required_argument
//!     value: 0
//!     name: xs
//!     data_type: any
//!   - step: output
//!     name: evens
//!     data_type: any
//!     expr:
//!       op: stream_execute
//!       input: { op: value, value: 0 }
//!       stream:
//!         stages:
//!           - stage: transform
//!             function:
//!               params: [x]
//!               body:
//!                 op: binary_math
//!                 operation: mult
//!                 left: { op: local, name: x }
//!                 right: { op: local, name: x }
//!           - stage: limit
//!             limit: { op: constant, value: 2 }
//! ```

use crate::error::PlanError;
use crate::physical::PhysicalProgram;
use crate::validate::validate;

/// Parse a YAML program document, name referenced values and validate it.
pub fn parse_yaml_program(src: &str) -> Result<PhysicalProgram, PlanError> {
    let program: PhysicalProgram = serde_yaml::from_str(src)?;
    finish(program)
}

/// Accept either JSON or YAML; JSON is detected by a leading `{`.
pub fn parse_program(src: &str) -> Result<PhysicalProgram, PlanError> {
    if src.trim_start().starts_with('{') {
        let program: PhysicalProgram = serde_json::from_str(src)?;
        finish(program)
    } else {
        parse_yaml_program(src)
    }
}

fn finish(mut program: PhysicalProgram) -> Result<PhysicalProgram, PlanError> {
    program.assign_names()?;
    validate(&program)?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprOp;
    use crate::physical::Step;
    use crate::stream::StreamOp;

    const DOC: &str = r#"
name: squares
values:
  - { id: 0, name: xs, data_type: any }
  - { id: 1, data_type: any }
steps:
  - step: required_argument
    value: 0
    name: xs
    data_type: any
  - step: evaluate
    value: 1
    expr:
      op: stream_execute
      input: { op: value, value: 0 }
      stream:
        stages:
          - stage: filter
            predicate:
              params: [x]
              body:
                op: boolean_compare
                comparison: gt
                left: { op: local, name: x }
                right: { op: constant, value: 2 }
          - stage: distinct
  - step: output
    name: out
    data_type: any
    expr: { op: value, value: 1, loc: { line: 30, column: 4 } }
"#;

    #[test]
    fn test_parse_yaml_program() {
        let program = parse_yaml_program(DOC).expect("parse");
        assert_eq!(program.name, "squares");
        assert_eq!(program.steps.len(), 3);
        assert_eq!(program.arguments()[0].name, "xs");
        assert!(program.arguments()[0].is_required());

        match &program.steps[1] {
            Step::Evaluate { expr, .. } => match &expr.op {
                ExprOp::StreamExecute { stream, .. } => {
                    assert!(matches!(stream.stages[0].op, StreamOp::Filter { .. }));
                    assert!(matches!(stream.stages[1].op, StreamOp::Distinct));
                }
                other => panic!("unexpected op {}", other.kind()),
            },
            other => panic!("unexpected step {}", other.kind()),
        }

        // The unnamed evaluate slot received a generated name.
        let generated = program
            .value(plexus_core::id::ValueId::new(1))
            .and_then(|d| d.name.clone());
        assert_eq!(generated.as_deref(), Some("local0"));

        match &program.steps[2] {
            Step::Output { expr, .. } => assert_eq!(expr.loc.line, 30),
            other => panic!("unexpected step {}", other.kind()),
        }
    }

    #[test]
    fn test_json_document() {
        let src = r#"{"name": "empty", "steps": [{"step": "end"}]}"#;
        let program = parse_program(src).expect("parse json");
        assert_eq!(program.steps, vec![Step::End]);
    }

    #[test]
    fn test_unknown_operator_is_a_parse_error() {
        let src = "name: bad\nsteps:\n  - step: execute\n    expr: { op: teleport }\n";
        assert!(matches!(parse_yaml_program(src), Err(PlanError::Yaml(_))));
    }
}
