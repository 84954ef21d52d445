use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;

use crate::error::ValidationErrors;

/// Checks an outgoing operation against the schema of the backend it is sent to.
pub trait Validator: Send + Sync {
    fn validate(&self, schema: &Valid<Schema>, document: &ast::Document)
    -> Result<(), ValidationErrors>;
}

impl<F> Validator for F
where
    F: Fn(&Valid<Schema>, &ast::Document) -> Result<(), ValidationErrors> + Send + Sync,
{
    fn validate(
        &self,
        schema: &Valid<Schema>,
        document: &ast::Document,
    ) -> Result<(), ValidationErrors> {
        self(schema, document)
    }
}

/// Full GraphQL validation, as implemented by `apollo-compiler`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompilerValidator;

impl Validator for CompilerValidator {
    fn validate(
        &self,
        schema: &Valid<Schema>,
        document: &ast::Document,
    ) -> Result<(), ValidationErrors> {
        document
            .to_executable_validate(schema)
            .map(|_| ())
            .map_err(ValidationErrors::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve_info::tests::schema;

    #[test]
    fn reports_every_violation() {
        let schema = schema("type Query { a: String b: Int }");
        let valid = ast::Document::parse("{ a b }", "query.graphql").unwrap();
        let invalid = ast::Document::parse("{ a missing other }", "query.graphql").unwrap();

        assert!(CompilerValidator.validate(&schema, &valid).is_ok());
        let errors = CompilerValidator.validate(&schema, &invalid).unwrap_err();
        assert_eq!(errors.errors.len(), 2);
    }
}
