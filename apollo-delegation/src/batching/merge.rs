use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;

use super::ExtensionsReducer;
use super::MergePolicy;
use crate::delegate::request::drop_unused_fragments;
use crate::error::BatchingError;
use crate::graphql::Request;
use crate::json_ext::Object;
use crate::resolve_info::Fragments;
use crate::resolve_info::response_key;

/// Merges requests by prefixing everything that could collide with `_{index}_`.
///
/// Root response keys become aliases (`field` of request 1 is selected as `_1_field: field`),
/// variables and fragments are renamed, and root fragment spreads are inlined so their fields
/// can be aliased too. The merged operation is anonymous and takes the kind of the first
/// request.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrefixMergePolicy;

impl MergePolicy for PrefixMergePolicy {
    fn merge(
        &self,
        requests: &[Request],
        reducer: &ExtensionsReducer,
    ) -> Result<Request, BatchingError> {
        let mut operation_type = None;
        let mut variable_definitions = Vec::new();
        let mut selection_set = Vec::new();
        let mut fragment_definitions = Vec::new();
        let mut variables = Object::new();
        let mut extensions = Object::new();

        for (index, request) in requests.iter().enumerate() {
            let operation = request.operation().ok_or_else(|| {
                BatchingError::Merge(format!("request {index} has no operation to run"))
            })?;
            operation_type.get_or_insert(operation.operation_type);
            let prefixer = Prefixer {
                prefix: format!("_{index}_"),
                fragments: request.fragments(),
            };

            for definition in &operation.variables {
                let mut definition = (**definition).clone();
                definition.name = prefixer.name(&definition.name)?;
                variable_definitions.push(Node::new(definition));
            }
            for selection in &operation.selection_set {
                prefixer.root_selection(selection, &mut selection_set)?;
            }
            for fragment in prefixer.fragments.values() {
                let mut fragment = (**fragment).clone();
                fragment.name = prefixer.name(&fragment.name)?;
                fragment.directives = prefixer.directives(&fragment.directives)?;
                fragment.selection_set = prefixer.selection_set(&fragment.selection_set)?;
                fragment_definitions.push(ast::Definition::FragmentDefinition(Node::new(fragment)));
            }
            for (name, value) in &request.variables {
                variables.insert(
                    format!("{}{}", prefixer.prefix, name.as_str()),
                    value.clone(),
                );
            }
            extensions = reducer(extensions, request);
        }

        let mut document = ast::Document::new();
        document
            .definitions
            .push(ast::Definition::OperationDefinition(Node::new(
                ast::OperationDefinition {
                    operation_type: operation_type.unwrap_or(ast::OperationType::Query),
                    name: None,
                    variables: variable_definitions,
                    directives: ast::DirectiveList::default(),
                    selection_set,
                },
            )));
        document.definitions.extend(fragment_definitions);

        let merged = Request::builder()
            .document(Arc::new(document))
            .variables(variables)
            .extensions(extensions)
            .build();
        // Fragments spread only at the root were inlined.
        Ok(drop_unused_fragments(&merged))
    }
}

struct Prefixer {
    prefix: String,
    fragments: Fragments,
}

impl Prefixer {
    fn name(&self, name: &str) -> Result<Name, BatchingError> {
        let prefixed = format!("{}{name}", self.prefix);
        Name::new(&prefixed).map_err(|_| BatchingError::Merge(format!("invalid name {prefixed}")))
    }

    /// Pushes `selection`, a root selection, with its response keys prefixed.
    fn root_selection(
        &self,
        selection: &ast::Selection,
        into: &mut Vec<ast::Selection>,
    ) -> Result<(), BatchingError> {
        match selection {
            ast::Selection::Field(field) => {
                let mut prefixed = self.field(field)?;
                prefixed.alias = Some(self.name(response_key(field))?);
                into.push(ast::Selection::Field(Node::new(prefixed)));
            }
            ast::Selection::InlineFragment(inline) => {
                let mut selections = Vec::new();
                for selection in &inline.selection_set {
                    self.root_selection(selection, &mut selections)?;
                }
                into.push(ast::Selection::InlineFragment(Node::new(
                    ast::InlineFragment {
                        type_condition: inline.type_condition.clone(),
                        directives: self.directives(&inline.directives)?,
                        selection_set: selections,
                    },
                )));
            }
            ast::Selection::FragmentSpread(spread) => {
                let fragment = self.fragments.get(&spread.fragment_name).ok_or_else(|| {
                    BatchingError::Merge(format!("unknown fragment {}", spread.fragment_name))
                })?;
                let mut selections = Vec::new();
                for selection in &fragment.selection_set {
                    self.root_selection(selection, &mut selections)?;
                }
                into.push(ast::Selection::InlineFragment(Node::new(
                    ast::InlineFragment {
                        type_condition: Some(fragment.type_condition.clone()),
                        directives: self.directives(&spread.directives)?,
                        selection_set: selections,
                    },
                )));
            }
        }
        Ok(())
    }

    fn field(&self, field: &ast::Field) -> Result<ast::Field, BatchingError> {
        Ok(ast::Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: self.arguments(&field.arguments),
            directives: self.directives(&field.directives)?,
            selection_set: self.selection_set(&field.selection_set)?,
        })
    }

    fn selection_set(
        &self,
        selection_set: &[ast::Selection],
    ) -> Result<Vec<ast::Selection>, BatchingError> {
        selection_set
            .iter()
            .map(|selection| {
                Ok(match selection {
                    ast::Selection::Field(field) => {
                        ast::Selection::Field(Node::new(self.field(field)?))
                    }
                    ast::Selection::InlineFragment(inline) => {
                        ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                            type_condition: inline.type_condition.clone(),
                            directives: self.directives(&inline.directives)?,
                            selection_set: self.selection_set(&inline.selection_set)?,
                        }))
                    }
                    ast::Selection::FragmentSpread(spread) => {
                        ast::Selection::FragmentSpread(Node::new(ast::FragmentSpread {
                            fragment_name: self.name(&spread.fragment_name)?,
                            directives: self.directives(&spread.directives)?,
                        }))
                    }
                })
            })
            .collect()
    }

    fn directives(
        &self,
        directives: &ast::DirectiveList,
    ) -> Result<ast::DirectiveList, BatchingError> {
        Ok(ast::DirectiveList(
            directives
                .iter()
                .map(|directive| {
                    Node::new(ast::Directive {
                        name: directive.name.clone(),
                        arguments: self.arguments(&directive.arguments),
                    })
                })
                .collect(),
        ))
    }

    fn arguments(&self, arguments: &[Node<ast::Argument>]) -> Vec<Node<ast::Argument>> {
        arguments
            .iter()
            .map(|argument| {
                Node::new(ast::Argument {
                    name: argument.name.clone(),
                    value: Node::new(self.value(&argument.value)),
                })
            })
            .collect()
    }

    fn value(&self, value: &ast::Value) -> ast::Value {
        match value {
            ast::Value::Variable(name) => match self.name(name) {
                Ok(prefixed) => ast::Value::Variable(prefixed),
                Err(_) => value.clone(),
            },
            ast::Value::List(items) => ast::Value::List(
                items
                    .iter()
                    .map(|item| Node::new(self.value(item)))
                    .collect(),
            ),
            ast::Value::Object(fields) => ast::Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), Node::new(self.value(value))))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }
}
