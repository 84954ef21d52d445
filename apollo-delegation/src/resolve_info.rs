//! Resolution info of the outer field being resolved when a delegation happens.
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::schema::FieldLookupError;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;

use crate::configuration::ConfigurationError;
use crate::graphql::OperationKind;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::subschema::StitchingInfo;

/// Fragment definitions of an operation document, by name.
pub type Fragments = IndexMap<Name, Node<ast::FragmentDefinition>>;

/// What the composite schema's execution knows about the field it is resolving.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ResolveInfo {
    /// The composite schema the outer operation runs against.
    pub schema: Arc<Valid<Schema>>,
    /// Name of the type the field is selected on.
    pub parent_type: Name,
    /// The field selection being resolved.
    pub field: Node<ast::Field>,
    /// Declared type of the field in the composite schema.
    pub return_type: ast::Type,
    /// Path of the field in the outer response.
    pub path: Path,
    /// The outer operation.
    pub operation: Node<ast::OperationDefinition>,
    /// Coerced variable values of the outer operation.
    pub variable_values: Object,
    pub fragments: Arc<Fragments>,
    pub stitching_info: Option<Arc<StitchingInfo>>,
}

#[buildstructor::buildstructor]
impl ResolveInfo {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        schema: Arc<Valid<Schema>>,
        parent_type: Name,
        field: Node<ast::Field>,
        return_type: ast::Type,
        path: Option<Path>,
        operation: Node<ast::OperationDefinition>,
        variable_values: Option<Object>,
        fragments: Option<Arc<Fragments>>,
        stitching_info: Option<Arc<StitchingInfo>>,
    ) -> Self {
        Self {
            schema,
            parent_type,
            path: path.unwrap_or_else(|| Path::from_slice(&[response_key(&field).as_str()])),
            field,
            return_type,
            operation,
            variable_values: variable_values.unwrap_or_default(),
            fragments: fragments.unwrap_or_default(),
            stitching_info,
        }
    }

    /// Infos for each root field of an operation in `document`.
    ///
    /// Fragment spreads and inline fragments on the root type are flattened.
    pub fn for_operation(
        schema: Arc<Valid<Schema>>,
        document: &ast::Document,
        operation_name: Option<&str>,
        variable_values: Object,
        stitching_info: Option<Arc<StitchingInfo>>,
    ) -> Result<Vec<ResolveInfo>, ConfigurationError> {
        let mut operations = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(op) => Some(op),
                _ => None,
            })
            .filter(|op| operation_name.is_none() || op.name.as_deref() == operation_name);
        let operation = operations
            .next()
            .ok_or(ConfigurationError::MissingOperation)?
            .clone();
        let fragments: Arc<Fragments> = Arc::new(
            document
                .definitions
                .iter()
                .filter_map(|definition| match definition {
                    ast::Definition::FragmentDefinition(fragment) => {
                        Some((fragment.name.clone(), fragment.clone()))
                    }
                    _ => None,
                })
                .collect(),
        );
        let kind = OperationKind::from(operation.operation_type);
        let root_type = schema
            .root_operation(operation.operation_type)
            .ok_or(ConfigurationError::MissingRootType(kind))?
            .clone();

        collect_fields(&operation.selection_set, &fragments)
            .into_iter()
            .map(|field| {
                let return_type = field_type(&schema, &root_type, &field.name)?;
                Ok(ResolveInfo {
                    schema: schema.clone(),
                    parent_type: root_type.clone(),
                    path: Path::from_slice(&[response_key(&field).as_str()]),
                    field,
                    return_type,
                    operation: operation.clone(),
                    variable_values: variable_values.clone(),
                    fragments: fragments.clone(),
                    stitching_info: stitching_info.clone(),
                })
            })
            .collect()
    }

    /// Infos for the fields selected below this one.
    pub fn children(&self) -> Result<Vec<ResolveInfo>, ConfigurationError> {
        let parent_type = self.return_type.inner_named_type().clone();
        collect_fields(&self.field.selection_set, &self.fragments)
            .into_iter()
            .map(|field| {
                let return_type = field_type(&self.schema, &parent_type, &field.name)?;
                Ok(ResolveInfo {
                    path: self.path.join(response_key(&field).as_str()),
                    parent_type: parent_type.clone(),
                    field,
                    return_type,
                    ..self.clone()
                })
            })
            .collect()
    }

    /// The same field, resolved for the item at `index` of a list.
    pub fn at_index(&self, index: usize) -> ResolveInfo {
        ResolveInfo {
            path: self.path.join(index),
            return_type: match &self.return_type {
                ast::Type::List(inner) | ast::Type::NonNullList(inner) => (**inner).clone(),
                other => other.clone(),
            },
            ..self.clone()
        }
    }

    pub fn field_name(&self) -> &str {
        self.field.name.as_str()
    }

    /// The key this field is found under in the response.
    pub fn response_key(&self) -> &str {
        response_key(&self.field).as_str()
    }

    /// Name of the composite schema's root type for operations of `kind`, if any.
    pub fn root_type(&self, kind: OperationKind) -> Option<&Name> {
        self.schema.root_operation(kind.into())
    }
}

/// The key a field selection is found under in the response: its alias, or its name.
pub fn response_key(field: &ast::Field) -> &Name {
    field.alias.as_ref().unwrap_or(&field.name)
}

/// Field selections of `selection_set`, with fragments flattened.
pub(crate) fn collect_fields(
    selection_set: &[ast::Selection],
    fragments: &Fragments,
) -> Vec<Node<ast::Field>> {
    let mut fields = Vec::new();
    collect_fields_into(selection_set, fragments, &mut fields, &mut Vec::new());
    fields
}

fn collect_fields_into(
    selection_set: &[ast::Selection],
    fragments: &Fragments,
    fields: &mut Vec<Node<ast::Field>>,
    visited: &mut Vec<Name>,
) {
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => fields.push(field.clone()),
            ast::Selection::InlineFragment(inline) => {
                collect_fields_into(&inline.selection_set, fragments, fields, visited)
            }
            ast::Selection::FragmentSpread(spread) => {
                if visited.contains(&spread.fragment_name) {
                    continue;
                }
                visited.push(spread.fragment_name.clone());
                if let Some(fragment) = fragments.get(&spread.fragment_name) {
                    collect_fields_into(&fragment.selection_set, fragments, fields, visited)
                }
            }
        }
    }
}

/// Declared type of `field_name` on `type_name`.
pub(crate) fn field_type(
    schema: &Schema,
    type_name: &str,
    field_name: &str,
) -> Result<ast::Type, ConfigurationError> {
    if field_name == "__typename" {
        return Ok(ast::Type::NonNullNamed(name!("String")));
    }
    schema
        .type_field(type_name, field_name)
        .map(|definition| definition.ty.clone())
        .map_err(|e| match e {
            FieldLookupError::NoSuchType => ConfigurationError::MissingRootField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            },
            FieldLookupError::NoSuchField(..) => ConfigurationError::MissingRootField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            },
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn schema(sdl: &str) -> Arc<Valid<Schema>> {
        Arc::new(Schema::parse_and_validate(sdl, "schema.graphql").unwrap())
    }

    pub(crate) fn root_infos(schema: &Arc<Valid<Schema>>, query: &str) -> Vec<ResolveInfo> {
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        ResolveInfo::for_operation(schema.clone(), &document, None, Object::new(), None).unwrap()
    }

    #[test]
    fn root_fields_flatten_fragments() {
        let schema = schema("type Query { a: String b: [Item] } type Item { id: ID name: String }");
        let infos = root_infos(&schema, "{ first: a ...F } fragment F on Query { b { id } }");

        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].response_key(), "first");
        assert_eq!(infos[0].field_name(), "a");
        assert_eq!(infos[0].path, Path::from_slice(&["first"]));
        assert_eq!(infos[1].return_type.inner_named_type().as_str(), "Item");
        assert_eq!(infos[1].parent_type.as_str(), "Query");
    }

    #[test]
    fn children_extend_the_path() {
        let schema = schema("type Query { b: [Item] } type Item { id: ID name: String }");
        let infos = root_infos(&schema, "{ b { id ... on Item { label: name } } }");
        let item = infos[0].at_index(3);
        let children = item.children().unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[1].path.to_string(), "/b/3/label");
        assert_eq!(children[1].parent_type.as_str(), "Item");
        assert_eq!(children[0].field_name(), "id");
    }

    #[test]
    fn unknown_fields_are_configuration_errors() {
        let schema = schema("type Query { a: String }");
        let error = field_type(&schema, "Query", "missing").unwrap_err();
        assert_eq!(
            error,
            ConfigurationError::MissingRootField {
                type_name: "Query".to_string(),
                field_name: "missing".to_string(),
            }
        );
    }
}
