use crate::similarity::{Description, Elem, SimilarityMeasure};
use crate::LshError;

/// Append-only storage of encoded points.
///
/// All points live in one contiguous buffer; `offsets[i]..offsets[i + 1]`
/// delimits point `i`. Ids are assigned in insertion order and never change.
#[derive(Debug, Clone)]
pub struct Dataset<S: SimilarityMeasure> {
    description: Description,
    data: Vec<Elem<S>>,
    offsets: Vec<usize>,
}

impl<S: SimilarityMeasure> Dataset<S> {
    pub fn new(description: Description) -> Self {
        Self {
            description,
            data: Vec::new(),
            offsets: vec![0],
        }
    }

    pub fn description(&self) -> &Description {
        &self.description
    }

    /// Encode and store `input`, returning its id.
    pub fn insert(&mut self, input: &S::Input) -> Result<usize, LshError> {
        let id = self.len();
        if id >= u32::MAX as usize {
            return Err(LshError::InvalidConfig("dataset holds at most u32::MAX points"));
        }
        S::validate(input, &self.description)?;
        S::encode_into(input, &self.description, &mut self.data);
        self.offsets.push(self.data.len());
        Ok(id)
    }

    pub fn get(&self, id: usize) -> Option<&[Elem<S>]> {
        if id >= self.len() {
            return None;
        }
        Some(self.point(id))
    }

    /// Stored point `id`. Panics when out of range.
    #[inline]
    pub fn point(&self, id: usize) -> &[Elem<S>] {
        &self.data[self.offsets[id]..self.offsets[id + 1]]
    }

    /// Exact similarity between two stored points.
    #[inline]
    pub fn similarity(&self, a: usize, b: usize) -> f32 {
        S::similarity(self.point(a), self.point(b), &self.description)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_usage(&self) -> usize {
        self.data.len() * std::mem::size_of::<Elem<S>>()
            + self.offsets.len() * std::mem::size_of::<usize>()
    }
}
