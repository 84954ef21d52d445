use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;

use super::Transform;
use crate::configuration::ConfigurationError;

/// Hides object type fields from a subschema's transformed schema.
///
/// The filter is called with a type name and a field name and keeps the field when it returns
/// true.
pub struct FilterObjectFields {
    filter: Arc<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

impl FilterObjectFields {
    pub fn new(filter: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl Transform for FilterObjectFields {
    fn transform_schema(
        &self,
        schema: Arc<Valid<Schema>>,
    ) -> Result<Arc<Valid<Schema>>, ConfigurationError> {
        let hides = |type_name: &str, ty: &ExtendedType| match ty {
            ExtendedType::Object(object) => object
                .fields
                .keys()
                .any(|field_name| !(self.filter)(type_name, field_name.as_str())),
            _ => false,
        };
        if !schema.types.iter().any(|(name, ty)| hides(name.as_str(), ty)) {
            return Ok(schema);
        }

        let mut schema = (*schema).clone().into_inner();
        for (type_name, ty) in schema.types.iter_mut() {
            if !hides(type_name.as_str(), &*ty) {
                continue;
            }
            if let ExtendedType::Object(object) = ty {
                object
                    .make_mut()
                    .fields
                    .retain(|field_name, _| (self.filter)(type_name.as_str(), field_name.as_str()));
            }
        }
        schema
            .validate()
            .map(Arc::new)
            .map_err(|e| ConfigurationError::InvalidConfiguration {
                message: "filtering object fields produced an invalid schema",
                error: e.errors.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<Valid<Schema>> {
        Arc::new(
            Schema::parse_and_validate(
                "type Query { a: Object b: String } type Object { keep: String drop: String }",
                "schema.graphql",
            )
            .unwrap(),
        )
    }

    #[test]
    fn filtered_fields_disappear() {
        let filter = FilterObjectFields::new(|_, field_name| field_name != "drop");
        let transformed = filter.transform_schema(schema()).unwrap();
        assert!(transformed.type_field("Object", "keep").is_ok());
        assert!(transformed.type_field("Object", "drop").is_err());
        assert!(transformed.type_field("Query", "b").is_ok());
    }

    #[test]
    fn schema_without_hidden_fields_is_shared() {
        let original = schema();
        let filter = FilterObjectFields::new(|_, _| true);
        let transformed = filter.transform_schema(original.clone()).unwrap();
        assert!(Arc::ptr_eq(&transformed, &original));
    }

    #[test]
    fn emptying_a_type_is_a_configuration_error() {
        let filter = FilterObjectFields::new(|type_name, _| type_name != "Object");
        assert!(matches!(
            filter.transform_schema(schema()),
            Err(ConfigurationError::InvalidConfiguration { .. })
        ));
    }
}
