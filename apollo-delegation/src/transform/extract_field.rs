use apollo_compiler::Node;
use apollo_compiler::ast;

use super::Transform;
use super::TransformationContext;
use crate::delegate::DelegationContext;
use crate::error::DelegationError;
use crate::graphql::Request;

/// Moves a selection set within the delegated operation.
///
/// The selection set of the first field found at `from` replaces the selection set of every
/// field found at `to`. Paths are field names starting at the operation root; aliases are
/// ignored and inline fragments are looked through.
#[derive(Clone, Debug)]
pub struct ExtractField {
    from: Vec<String>,
    to: Vec<String>,
}

impl ExtractField {
    pub fn new(from: Vec<String>, to: Vec<String>) -> Self {
        Self { from, to }
    }
}

impl Transform for ExtractField {
    fn transform_request(
        &self,
        request: Request,
        _delegation: &DelegationContext,
        _context: &mut TransformationContext,
    ) -> Result<Request, DelegationError> {
        let Some(from) = request
            .document
            .definitions
            .iter()
            .find_map(|definition| match definition {
                ast::Definition::OperationDefinition(op) => {
                    find_selection_set(&op.selection_set, &self.from, &mut Vec::new())
                }
                _ => None,
            })
        else {
            return Ok(request);
        };

        let mut document = (*request.document).clone();
        for definition in &mut document.definitions {
            if let ast::Definition::OperationDefinition(op) = definition {
                replace_selection_sets(
                    &mut op.make_mut().selection_set,
                    &self.to,
                    &from,
                    &mut Vec::new(),
                );
            }
        }
        Ok(request.with_document(document))
    }
}

fn find_selection_set<'a>(
    selection_set: &'a [ast::Selection],
    target: &[String],
    path: &mut Vec<&'a str>,
) -> Option<Vec<ast::Selection>> {
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => {
                path.push(field.name.as_str());
                if path.iter().eq(target.iter()) {
                    return Some(field.selection_set.clone());
                }
                let found = find_selection_set(&field.selection_set, target, path);
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            ast::Selection::InlineFragment(inline) => {
                if let Some(found) = find_selection_set(&inline.selection_set, target, path) {
                    return Some(found);
                }
            }
            ast::Selection::FragmentSpread(_) => {}
        }
    }
    None
}

fn replace_selection_sets(
    selection_set: &mut [ast::Selection],
    target: &[String],
    replacement: &[ast::Selection],
    path: &mut Vec<String>,
) {
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => {
                path.push(field.name.to_string());
                let field = field.make_mut();
                if *path == target {
                    field.selection_set = replacement.to_vec();
                } else {
                    replace_selection_sets(&mut field.selection_set, target, replacement, path);
                }
                path.pop();
            }
            ast::Selection::InlineFragment(inline) => replace_selection_sets(
                &mut Node::make_mut(inline).selection_set,
                target,
                replacement,
                path,
            ),
            ast::Selection::FragmentSpread(_) => {}
        }
    }
}
