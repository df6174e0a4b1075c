use crate::pipeline::plan::BuildPlan;
use crate::validation::rules::{
    AbsolutePathsRule, CacheOrderingRule, DirectiveOrderRule, ExecFormEntrypointRule,
    PinnedBaseRule, PythonRuntimeEnvRule, RequiredFieldsRule, ValidEnvKeysRule,
    ValidHealthcheckRule, ValidationRule,
};
use anyhow::Result;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn validate(&self, plan: &BuildPlan) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(plan) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(DirectiveOrderRule),
                Box::new(CacheOrderingRule),
                Box::new(PinnedBaseRule),
                Box::new(AbsolutePathsRule),
                Box::new(ExecFormEntrypointRule),
                Box::new(ValidEnvKeysRule),
                Box::new(PythonRuntimeEnvRule),
                Box::new(ValidHealthcheckRule),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::schema::ImageRecipe;

    #[test]
    fn test_validator_valid_plan() {
        let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
        assert!(Validator::new().validate(&plan).is_ok());
    }

    #[test]
    fn test_validator_names_failing_rule() {
        let mut recipe = ImageRecipe::python_bot();
        recipe.base.tag = "latest".to_string();
        let result = Validator::new().validate(&BuildPlan::from_recipe(&recipe));
        assert!(result.unwrap_err().to_string().contains("[PinnedBase]"));
    }

    #[test]
    fn test_validator_stops_at_first_rule() {
        let mut plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
        plan.image = String::new();
        plan.directives.swap(4, 5);
        let err = Validator::new().validate(&plan).unwrap_err();
        assert!(err.to_string().starts_with("[RequiredFields]"));
    }

    #[test]
    fn test_custom_rule_set() {
        let mut plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
        plan.directives.swap(4, 5);
        let validator = Validator::with_rules(vec![Box::new(PinnedBaseRule)]);
        assert!(validator.validate(&plan).is_ok());
    }
}
