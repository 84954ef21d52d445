//! Building the request a delegated call sends, from the outer field being resolved.
use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;

use crate::configuration::ConfigurationError;
use crate::graphql::OperationKind;
use crate::graphql::Request;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::resolve_info::Fragments;
use crate::resolve_info::ResolveInfo;

/// The root field a delegation selects: the outer field renamed to `field_name`, with `args`
/// overriding or adding arguments.
///
/// The response key is kept so the result can be read back where the caller expects it.
pub(crate) fn root_field(
    info: &ResolveInfo,
    field_name: &str,
    args: Option<&Object>,
) -> Result<ast::Field, ConfigurationError> {
    let mut field = (*info.field).clone();
    if field.name != field_name {
        if field.alias.is_none() {
            field.alias = Some(field.name.clone());
        }
        field.name = parse_name(field_name)?;
    }
    if let Some(args) = args {
        for (name, value) in args {
            let name = parse_name(name.as_str())?;
            let value = Node::new(json_to_ast_value(value));
            match field
                .arguments
                .iter_mut()
                .find(|argument| argument.name == name)
            {
                Some(argument) => argument.make_mut().value = value,
                None => field
                    .arguments
                    .push(Node::new(ast::Argument { name, value })),
            }
        }
    }
    Ok(field)
}

/// A request running `root` as the only root field of a `kind` operation.
///
/// Variable definitions, values and fragments are carried over from the outer operation,
/// keeping only those `root` uses.
pub(crate) fn operation_request(
    kind: OperationKind,
    operation_name: Option<&str>,
    root: ast::Field,
    info: &ResolveInfo,
) -> Result<Request, ConfigurationError> {
    let selection_set = vec![ast::Selection::Field(Node::new(root))];
    let usage = Usage::of(&selection_set, &info.fragments);

    let variables: Vec<_> = info
        .operation
        .variables
        .iter()
        .filter(|definition| usage.variables.contains(&definition.name))
        .cloned()
        .collect();
    let variable_values: Object = info
        .variable_values
        .iter()
        .filter(|(name, _)| {
            usage
                .variables
                .iter()
                .any(|used| used.as_str() == name.as_str())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let mut definitions = vec![ast::Definition::OperationDefinition(Node::new(
        ast::OperationDefinition {
            operation_type: kind.into(),
            name: operation_name.map(parse_name).transpose()?,
            variables,
            directives: ast::DirectiveList::default(),
            selection_set,
        },
    ))];
    definitions.extend(
        info.fragments
            .values()
            .filter(|fragment| usage.fragments.contains(&fragment.name))
            .map(|fragment| ast::Definition::FragmentDefinition(fragment.clone())),
    );

    let mut document = ast::Document::new();
    document.definitions = definitions;
    Ok(Request::builder()
        .document(Arc::new(document))
        .and_operation_name(operation_name.map(str::to_string))
        .variables(variable_values)
        .build())
}

/// Drops the selections `schema` cannot answer, starting from `type_name`.
///
/// Fields missing from the type, inline fragments on unknown types and spreads of fragments on
/// unknown types are removed. A composite field or fragment left without selections asks for
/// `__typename` instead. Fragment definitions are pruned against their own type condition.
pub(crate) fn prune_request(
    request: &Request,
    schema: &Schema,
    kind: OperationKind,
) -> Request {
    let Some(root_type) = schema.root_operation(kind.into()) else {
        return request.clone();
    };
    let fragments = request.fragments();
    let mut document = (*request.document).clone();
    for definition in &mut document.definitions {
        match definition {
            ast::Definition::OperationDefinition(operation) => {
                let operation = operation.make_mut();
                operation.selection_set =
                    prune_selection_set(schema, root_type, &operation.selection_set, &fragments);
            }
            ast::Definition::FragmentDefinition(fragment) => {
                if schema.types.contains_key(&fragment.type_condition) {
                    let fragment = fragment.make_mut();
                    let mut pruned = prune_selection_set(
                        schema,
                        &fragment.type_condition,
                        &fragment.selection_set,
                        &fragments,
                    );
                    if pruned.is_empty() {
                        pruned.push(typename_selection());
                    }
                    fragment.selection_set = pruned;
                }
            }
            _ => {}
        }
    }
    request.with_document(document)
}

fn prune_selection_set(
    schema: &Schema,
    type_name: &str,
    selection_set: &[ast::Selection],
    fragments: &Fragments,
) -> Vec<ast::Selection> {
    selection_set
        .iter()
        .filter_map(|selection| match selection {
            ast::Selection::Field(field) => {
                if field.name == "__typename" {
                    return Some(selection.clone());
                }
                let definition = schema.type_field(type_name, &field.name).ok()?;
                if field.selection_set.is_empty() {
                    return Some(selection.clone());
                }
                let mut pruned = prune_selection_set(
                    schema,
                    definition.ty.inner_named_type(),
                    &field.selection_set,
                    fragments,
                );
                if pruned.is_empty() {
                    pruned.push(typename_selection());
                }
                let mut field = field.clone();
                field.make_mut().selection_set = pruned;
                Some(ast::Selection::Field(field))
            }
            ast::Selection::InlineFragment(inline) => {
                let condition = match &inline.type_condition {
                    Some(condition) if !schema.types.contains_key(condition) => return None,
                    Some(condition) => condition.as_str(),
                    None => type_name,
                };
                let pruned =
                    prune_selection_set(schema, condition, &inline.selection_set, fragments);
                if pruned.is_empty() {
                    return None;
                }
                let mut inline = inline.clone();
                inline.make_mut().selection_set = pruned;
                Some(ast::Selection::InlineFragment(inline))
            }
            ast::Selection::FragmentSpread(spread) => fragments
                .get(&spread.fragment_name)
                .filter(|fragment| schema.types.contains_key(&fragment.type_condition))
                .map(|_| selection.clone()),
        })
        .collect()
}

fn typename_selection() -> ast::Selection {
    ast::Selection::Field(Node::new(ast::Field {
        alias: None,
        name: name!("__typename"),
        arguments: Vec::new(),
        directives: ast::DirectiveList::default(),
        selection_set: Vec::new(),
    }))
}

/// Drops fragment definitions nothing in the operation spreads any more.
pub(crate) fn drop_unused_fragments(request: &Request) -> Request {
    let Some(operation) = request.operation() else {
        return request.clone();
    };
    let usage = Usage::of(&operation.selection_set, &request.fragments());
    let mut document = (*request.document).clone();
    document.definitions.retain(|definition| match definition {
        ast::Definition::FragmentDefinition(fragment) => usage.fragments.contains(&fragment.name),
        _ => true,
    });
    request.with_document(document)
}

/// Variables and fragments a selection set uses, following fragment spreads transitively.
#[derive(Debug, Default)]
struct Usage {
    variables: HashSet<Name>,
    fragments: HashSet<Name>,
}

impl Usage {
    fn of(selection_set: &[ast::Selection], fragments: &Fragments) -> Self {
        let mut usage = Self::default();
        usage.visit(selection_set, fragments);
        usage
    }

    fn visit(&mut self, selection_set: &[ast::Selection], fragments: &Fragments) {
        for selection in selection_set {
            match selection {
                ast::Selection::Field(field) => {
                    for argument in &field.arguments {
                        self.visit_value(&argument.value);
                    }
                    self.visit_directives(&field.directives);
                    self.visit(&field.selection_set, fragments);
                }
                ast::Selection::InlineFragment(inline) => {
                    self.visit_directives(&inline.directives);
                    self.visit(&inline.selection_set, fragments);
                }
                ast::Selection::FragmentSpread(spread) => {
                    self.visit_directives(&spread.directives);
                    if self.fragments.insert(spread.fragment_name.clone()) {
                        if let Some(fragment) = fragments.get(&spread.fragment_name) {
                            self.visit_directives(&fragment.directives);
                            self.visit(&fragment.selection_set, fragments);
                        }
                    }
                }
            }
        }
    }

    fn visit_directives(&mut self, directives: &ast::DirectiveList) {
        for directive in directives.iter() {
            for argument in &directive.arguments {
                self.visit_value(&argument.value);
            }
        }
    }

    fn visit_value(&mut self, value: &ast::Value) {
        match value {
            ast::Value::Variable(name) => {
                self.variables.insert(name.clone());
            }
            ast::Value::List(items) => items.iter().for_each(|item| self.visit_value(item)),
            ast::Value::Object(fields) => {
                fields.iter().for_each(|(_, value)| self.visit_value(value))
            }
            _ => {}
        }
    }
}

/// The GraphQL literal for a JSON value.
pub(crate) fn json_to_ast_value(value: &Value) -> ast::Value {
    match value {
        Value::Null => ast::Value::Null,
        Value::Bool(value) => ast::Value::Boolean(*value),
        Value::Number(number) if number.is_f64() => {
            ast::Value::Float(ast::FloatValue::new_parsed(&number.to_string()))
        }
        Value::Number(number) => ast::Value::Int(ast::IntValue::new_parsed(&number.to_string())),
        Value::String(value) => ast::Value::String(value.as_str().to_string()),
        Value::Array(items) => ast::Value::List(
            items
                .iter()
                .map(|item| Node::new(json_to_ast_value(item)))
                .collect(),
        ),
        Value::Object(fields) => ast::Value::Object(
            fields
                .iter()
                .filter_map(|(key, value)| {
                    Name::new(key.as_str())
                        .ok()
                        .map(|name| (name, Node::new(json_to_ast_value(value))))
                })
                .collect(),
        ),
    }
}

pub(crate) fn parse_name(name: &str) -> Result<Name, ConfigurationError> {
    Name::new(name).map_err(|_| ConfigurationError::InvalidName(name.to_string()))
}
