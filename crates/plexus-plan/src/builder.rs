//! Incremental construction of a `PhysicalProgram`.

use plexus_core::id::ValueId;
use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::error::PlanError;
use crate::expr::ExprNode;
use crate::physical::{PhysicalProgram, Step, ValueTable};
use crate::validate::validate;

#[derive(Debug)]
pub struct ProgramBuilder {
    name: String,
    values: ValueTable,
    steps: Vec<Step>,
    context: Option<ValueId>,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: ValueTable::new(),
            steps: Vec::new(),
            context: None,
        }
    }

    /// Register an unnamed value without a producing step yet.
    pub fn value(&mut self, data_type: DataType) -> ValueId {
        self.values.register(data_type)
    }

    pub fn required_argument(
        &mut self,
        name: &str,
        data_type: DataType,
    ) -> Result<ValueId, PlanError> {
        let value = self.argument_slot(name, data_type.clone())?;
        self.steps.push(Step::RequiredArgument {
            value,
            name: name.to_string(),
            data_type,
        });
        Ok(value)
    }

    pub fn optional_argument(
        &mut self,
        name: &str,
        data_type: DataType,
        default: Value,
    ) -> Result<ValueId, PlanError> {
        let value = self.argument_slot(name, data_type.clone())?;
        self.steps.push(Step::OptionalArgument {
            value,
            name: name.to_string(),
            data_type,
            default,
        });
        Ok(value)
    }

    fn argument_slot(&mut self, name: &str, data_type: DataType) -> Result<ValueId, PlanError> {
        self.values
            .register_named(name, data_type)
            .map_err(|e| match e {
                PlanError::DuplicateName(n) => PlanError::DuplicateArgument(n),
                other => other,
            })
    }

    /// Subsequent evaluation steps run under the context held in `slot`
    /// (`None` restores the invocation's root context).
    pub fn use_context(&mut self, slot: Option<ValueId>) -> &mut Self {
        self.context = slot;
        self
    }

    pub fn evaluate(&mut self, data_type: DataType, expr: ExprNode) -> ValueId {
        let value = self.values.register(data_type);
        self.evaluate_into(value, expr);
        value
    }

    /// Produce a previously registered value.
    pub fn evaluate_into(&mut self, value: ValueId, expr: ExprNode) -> &mut Self {
        self.steps.push(Step::Evaluate {
            value,
            expr,
            context: self.context,
        });
        self
    }

    pub fn evaluate_guarded(&mut self, data_type: DataType, expr: ExprNode) -> ValueId {
        let value = self.values.register(data_type);
        self.steps.push(Step::EvaluateGuarded {
            value,
            expr,
            context: self.context,
        });
        value
    }

    pub fn execute(&mut self, expr: ExprNode) -> &mut Self {
        self.steps.push(Step::Execute {
            expr,
            context: self.context,
        });
        self
    }

    pub fn output(&mut self, name: &str, data_type: DataType, expr: ExprNode) -> &mut Self {
        self.steps.push(Step::Output {
            name: name.to_string(),
            data_type,
            expr,
            context: self.context,
        });
        self
    }

    /// Close the program with `End`, name referenced values, and validate.
    pub fn build(mut self) -> Result<PhysicalProgram, PlanError> {
        if !matches!(self.steps.last(), Some(Step::End)) {
            self.steps.push(Step::End);
        }
        let mut program = PhysicalProgram {
            name: self.name,
            values: self.values.into_decls(),
            steps: self.steps,
        };
        program.assign_names()?;
        validate(&program)?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::build::*;

    #[test]
    fn test_build_appends_end_and_names_values() {
        let mut b = ProgramBuilder::new("square");
        let x = b.required_argument("x", DataType::Int64).expect("arg");
        let sq = b.evaluate(
            DataType::Int64,
            math(plexus_core::ops::ArithmeticOp::Mult, value(x), value(x)),
        );
        b.output("result", DataType::Int64, value(sq));
        let program = b.build().expect("build");

        assert!(matches!(program.steps.last(), Some(Step::End)));
        assert_eq!(program.value(x).and_then(|d| d.name.as_deref()), Some("x"));
        assert_eq!(program.value(sq).and_then(|d| d.name.as_deref()), Some("local0"));
        assert_eq!(program.arguments().len(), 1);
        assert_eq!(program.outputs()[0].name, "result");
    }

    #[test]
    fn test_duplicate_argument_rejected() {
        let mut b = ProgramBuilder::new("dup");
        b.required_argument("x", DataType::Int64).expect("first");
        let err = b
            .required_argument("x", DataType::Utf8)
            .expect_err("duplicate argument");
        assert!(matches!(err, PlanError::DuplicateArgument(name) if name == "x"));
    }

    #[test]
    fn test_read_before_write_rejected() {
        let mut b = ProgramBuilder::new("order");
        let later = b.value(DataType::Int64);
        b.output("early", DataType::Int64, value(later));
        b.evaluate_into(later, constant(1i64));
        assert!(matches!(
            b.build(),
            Err(PlanError::ReadBeforeWrite { step: 0, .. })
        ));
    }
}
