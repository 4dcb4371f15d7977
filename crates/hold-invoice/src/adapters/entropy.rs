//! Operating-system entropy adapter

use rand::rngs::OsRng;

use crate::domain::Commitment;
use crate::ports::{CommitmentSource, EntropyError};

/// Draws secrets from the OS CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl CommitmentSource for OsEntropy {
    fn generate(&self) -> Result<Commitment, EntropyError> {
        Commitment::generate(&mut OsRng).map_err(|e| EntropyError(e.to_string()))
    }
}
