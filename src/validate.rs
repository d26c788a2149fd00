//! Guards that gate every downstream computation.

use crate::error::{Error, Result};
use crate::service::{Collection, ProcessingService};
use tracing::info;

/// forces evaluation of the collection size and fails when it is zero.
/// `context` only labels the diagnostic.
pub fn validate_nonempty<S: ProcessingService + ?Sized>(
    service: &S,
    collection: &Collection,
    context: &str,
) -> Result<usize> {
    let size = service.size(collection)?;
    if size == 0 {
        return Err(Error::EmptyDataset {
            context: context.to_string(),
        });
    }
    info!(%context, size, "validated collection");
    Ok(size)
}

/// fails naming every band of `required` missing from `available`
pub fn validate_required_bands<A, R>(available: &[A], required: &[R]) -> Result<()>
where
    A: AsRef<str>,
    R: AsRef<str>,
{
    let missing: Vec<String> = required
        .iter()
        .map(|r| r.as_ref())
        .filter(|r| !available.iter().any(|a| a.as_ref() == *r))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingBands { missing })
    }
}
