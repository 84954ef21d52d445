use super::SplitPolicy;
use crate::error::BatchingError;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

/// Splits results of requests merged by [`super::PrefixMergePolicy`].
///
/// Data keys and errors whose first path segment carries a `_{index}_` prefix go to that
/// request with the prefix stripped. Errors that cannot be attributed (no path, or a first
/// segment without a known prefix) go to every request. Extensions go to every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrefixSplitPolicy;

impl SplitPolicy for PrefixSplitPolicy {
    fn split(&self, response: Response, count: usize) -> Result<Vec<Response>, BatchingError> {
        let data = match response.data {
            Some(Value::Object(data)) => Some(data),
            None | Some(Value::Null) => None,
            Some(_) => {
                return Err(BatchingError::Split(
                    "the merged result data is not an object".to_string(),
                ));
            }
        };
        let mut results: Vec<Response> = (0..count)
            .map(|_| {
                Response::builder()
                    .and_data(data.as_ref().map(|_| Value::Object(Object::new())))
                    .extensions(response.extensions.clone())
                    .build()
            })
            .collect();

        for (key, value) in data.into_iter().flatten() {
            match parse_key(key.as_str(), count) {
                Some((index, original)) => {
                    if let Some(Value::Object(data)) = results[index].data.as_mut() {
                        data.insert(original, value);
                    }
                }
                None => tracing::warn!(key = key.as_str(), "dropping unprefixed key from a batched result"),
            }
        }

        for mut error in response.errors {
            let target = match error.path.as_ref().and_then(|path| path.first()) {
                Some(PathElement::Key(key)) => parse_key(key, count)
                    .map(|(index, original)| (index, original.to_string())),
                _ => None,
            };
            match target {
                Some((index, original)) => {
                    if let Some(path) = error.path.as_mut() {
                        path.0[0] = PathElement::Key(original);
                    }
                    results[index].errors.push(error);
                }
                None => {
                    tracing::warn!(
                        message = %error.message,
                        "cannot attribute a batched error, reporting it to every caller"
                    );
                    for result in &mut results {
                        result.errors.push(error.clone());
                    }
                }
            }
        }

        Ok(results)
    }
}

/// The request index and original key of a `_{index}_{key}` response key.
fn parse_key(key: &str, count: usize) -> Option<(usize, &str)> {
    let (index, original) = key.strip_prefix('_')?.split_once('_')?;
    let index = index.parse().ok().filter(|index| *index < count)?;
    Some((index, original))
}
