use crate::detect::FormatTag;
use crate::formats::{FormatError, Grid, JsonDocument, LineList, SegmentDocument, Tree};
use rand::Rng;
use rand_core::RngCore;
use thiserror::Error;

/// Upper bound for the number of bytes `insert_random_bytes` draws when no
/// explicit count is requested.
pub const MAX_INSERT_LEN: usize = 0xFFFF;

/// One mutated candidate together with the name of the operation that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub bytes: Vec<u8>,
    pub operation: &'static str,
}

/// The result of applying one operation: either an edited structural model,
/// which still has to be serialized, or a finished raw byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<M> {
    Model(M),
    Raw(Vec<u8>),
}

/// A pure transform. It receives a freshly parsed model, the untouched seed
/// bytes (for operations that work on the raw view) and the session RNG.
pub type Transform<M> = fn(&M, &[u8], &mut dyn RngCore) -> Mutation<M>;

/// A named entry in a model's operation registry.
pub struct Operation<M> {
    pub name: &'static str,
    pub apply: Transform<M>,
}

impl<M> Operation<M> {
    pub const fn new(name: &'static str, apply: Transform<M>) -> Self {
        Self { name, apply }
    }
}

impl<M> Clone for Operation<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Operation<M> {}

impl<M> std::fmt::Debug for Operation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish()
    }
}

/// A format-aware, editable representation of a seed.
///
/// Implementors provide the three halves of a structural mutator: parsing,
/// serialization and an explicit registration list of named operations.
pub trait StructuralModel: Sized {
    /// Parses raw seed bytes. Failure means the bytes are not this format.
    fn parse(seed: &[u8]) -> Result<Self, FormatError>;

    /// Serializes the (possibly mutated) model back into a framed byte stream.
    ///
    /// Some formats scrub forbidden bytes during serialization, hence the RNG.
    fn serialize(&self, rng: &mut dyn RngCore) -> Vec<u8>;

    /// The model's registered operations, built at construction time.
    fn operations() -> Vec<Operation<Self>>;
}

/// A `Mutator` produces an unbounded sequence of candidates derived from one
/// immutable seed.
///
/// Every call is independent: implementations rebuild their structural model
/// from the seed before applying an operation, so mutations never compound.
/// The sequence never ends on its own; the caller bounds it.
pub trait Mutator {
    /// The format tag this mutator was registered for.
    fn format(&self) -> FormatTag;

    /// Names of all registered operations, in registration order.
    fn operation_names(&self) -> Vec<&'static str>;

    /// Generates the next candidate.
    ///
    /// # Arguments
    /// * `rng`: The session's random number generator. Operation choice and
    ///   every random decision inside the operation are drawn from it.
    ///
    /// # Returns
    /// `Result<Candidate, FormatError>`:
    ///   - `Ok(candidate)`: The serialized candidate and its operation name.
    ///   - `Err(error)`: If re-parsing the seed failed.
    fn next_candidate(&self, rng: &mut dyn RngCore) -> Result<Candidate, FormatError>;
}

/// Generic mutator over any `StructuralModel`.
///
/// Holds only the seed and the operation table; the model itself is
/// reconstructed on every call.
pub struct StructuredMutator<M: StructuralModel> {
    tag: FormatTag,
    seed: Vec<u8>,
    operations: Vec<Operation<M>>,
}

impl<M: StructuralModel> StructuredMutator<M> {
    /// Validates that `seed` parses as `M` and captures the operation table.
    pub fn new(tag: FormatTag, seed: Vec<u8>) -> Result<Self, FormatError> {
        M::parse(&seed)?;
        let operations = M::operations();
        if operations.is_empty() {
            return Err(FormatError::NoOperations);
        }
        Ok(Self {
            tag,
            seed,
            operations,
        })
    }
}

impl<M: StructuralModel> Mutator for StructuredMutator<M> {
    fn format(&self) -> FormatTag {
        self.tag
    }

    fn operation_names(&self) -> Vec<&'static str> {
        self.operations.iter().map(|op| op.name).collect()
    }

    fn next_candidate(&self, rng: &mut dyn RngCore) -> Result<Candidate, FormatError> {
        let operation = self.operations[rng.random_range(0..self.operations.len())];
        let model = M::parse(&self.seed)?;
        let bytes = match (operation.apply)(&model, &self.seed, rng) {
            Mutation::Model(mutated) => mutated.serialize(rng),
            Mutation::Raw(bytes) => bytes,
        };
        Ok(Candidate {
            bytes,
            operation: operation.name,
        })
    }
}

/// Errors that prevent a mutator from being built for a seed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutatorError {
    #[error("no mutator registered for format '{0}'")]
    Unsupported(FormatTag),

    #[error("seed does not parse as {tag}: {source}")]
    Format {
        tag: FormatTag,
        #[source]
        source: FormatError,
    },
}

/// Resolves the mutator implementation for a detected format tag.
///
/// This is the single tag-to-implementation mapping; it is consulted once at
/// session start.
pub fn mutator_for(tag: FormatTag, seed: Vec<u8>) -> Result<Box<dyn Mutator>, MutatorError> {
    fn build<M: StructuralModel + 'static>(
        tag: FormatTag,
        seed: Vec<u8>,
    ) -> Result<Box<dyn Mutator>, MutatorError> {
        StructuredMutator::<M>::new(tag, seed)
            .map(|m| Box::new(m) as Box<dyn Mutator>)
            .map_err(|source| MutatorError::Format { tag, source })
    }

    match tag {
        FormatTag::Csv => build::<Grid>(tag, seed),
        FormatTag::Json => build::<JsonDocument>(tag, seed),
        FormatTag::Xml => build::<Tree>(tag, seed),
        FormatTag::Plaintext => build::<LineList>(tag, seed),
        FormatTag::Jpeg => build::<SegmentDocument>(tag, seed),
        FormatTag::Pdf => Err(MutatorError::Unsupported(tag)),
    }
}

/// Replaces the byte at a uniformly random offset with a random value.
///
/// An empty input yields a single random byte.
pub fn replace_random_byte(sample: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
    let mut bytes = sample.to_vec();
    if bytes.is_empty() {
        bytes.push(rng.random::<u8>());
        return bytes;
    }
    let pos = rng.random_range(0..bytes.len());
    bytes[pos] = rng.random::<u8>();
    bytes
}

/// Removes the byte at a uniformly random offset. Empty input is returned as is.
pub fn delete_random_byte(sample: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
    let mut bytes = sample.to_vec();
    if !bytes.is_empty() {
        let pos = rng.random_range(0..bytes.len());
        bytes.remove(pos);
    }
    bytes
}

/// Inserts `count` random bytes at `position`.
///
/// `count` defaults to a random value in `1..=MAX_INSERT_LEN`, `position` to a
/// uniformly random offset in `0..=len`. An explicit position past the end is
/// clamped to the end.
pub fn insert_random_bytes(
    sample: &[u8],
    count: Option<usize>,
    position: Option<usize>,
    rng: &mut dyn RngCore,
) -> Vec<u8> {
    let count = count.unwrap_or_else(|| rng.random_range(1..=MAX_INSERT_LEN));
    let position = position
        .map(|p| p.min(sample.len()))
        .unwrap_or_else(|| rng.random_range(0..=sample.len()));

    let mut fresh = vec![0u8; count];
    rng.fill_bytes(&mut fresh);

    let mut bytes = Vec::with_capacity(sample.len() + count);
    bytes.extend_from_slice(&sample[..position]);
    bytes.extend_from_slice(&fresh);
    bytes.extend_from_slice(&sample[position..]);
    bytes
}

/// Replaces every occurrence of `needle` in `haystack` with `replacement`.
pub fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
