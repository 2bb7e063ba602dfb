use eyre::{bail, eyre};
use serde::{Deserialize, Serialize};

/// Memory layout of a multi-dimensional array.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// The last index varies fastest.
    RowMajor,
    /// The first index varies fastest.
    ColumnMajor,
}

impl Default for Layout {
    fn default() -> Self {
        Self::RowMajor
    }
}

/// Per-dimension sizes, strides and addressing offsets of an array handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shape<const D: usize> {
    dims: [usize; D],
    strides: [usize; D],
    offsets: [isize; D],
    layout: Layout,
}

impl<const D: usize> Default for Shape<D> {
    fn default() -> Self {
        Self::empty(Layout::default())
    }
}

impl Shape<1> {
    pub fn vector(len: usize, layout: Layout) -> Self {
        Self {
            dims: [len],
            strides: [1],
            offsets: [0],
            layout,
        }
    }
}

impl<const D: usize> Shape<D> {
    pub fn empty(layout: Layout) -> Self {
        Self {
            dims: [0; D],
            strides: [0; D],
            offsets: [0; D],
            layout,
        }
    }

    /// Validates the requested dimensions and computes strides for the given layout.
    pub fn from_dims(dims: &[usize], layout: Layout) -> eyre::Result<Self> {
        if dims.len() != D {
            bail!(
                "HeteroArray: the number of dimensions provided ({}) does not match the array dimension ({})",
                dims.len(),
                D
            );
        }

        let mut shape = Self::empty(layout);
        shape.dims.copy_from_slice(dims);

        let mut stride: usize = 1;
        let order: Box<dyn Iterator<Item = usize>> = match layout {
            Layout::RowMajor => Box::new((0..D).rev()),
            Layout::ColumnMajor => Box::new(0..D),
        };
        for i in order {
            shape.strides[i] = stride;
            stride = stride
                .checked_mul(dims[i])
                .ok_or_else(|| eyre!("HeteroArray: total size of dimensions {:?} overflows", dims))?;
        }

        Ok(shape)
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    pub fn strides(&self) -> [usize; D] {
        self.strides
    }

    pub fn offsets(&self) -> [isize; D] {
        self.offsets
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_offset(&self) -> bool {
        self.offsets.iter().any(|&d| d != 0)
    }

    pub fn set_offsets(&mut self, offsets: [isize; D]) {
        self.offsets = offsets;
    }

    /// Maps a (possibly offset) multi-index to a linear index into the storage.
    #[inline]
    pub fn linear_index(&self, index: [isize; D]) -> usize {
        let mut linear = 0;
        for i in 0..D {
            let shifted = index[i] - self.offsets[i];
            debug_assert!(
                shifted >= 0 && (shifted as usize) < self.dims[i],
                "HeteroArray: index {} out of bounds in dimension {} (size {}, offset {})",
                index[i],
                i,
                self.dims[i],
                self.offsets[i]
            );
            linear += shifted as usize * self.strides[i];
        }
        linear
    }
}
