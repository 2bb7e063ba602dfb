use crate::array::Array1D;
use crate::space::with_space;
use crate::space::MemorySpace;
use eyre::{ensure, eyre};
use rayon::prelude::*;
use std::ops::Range;

/// Compressed sparse row pattern with local rows and global columns.
///
/// Rows cover the local dofs followed by the ghost dofs of this process.
#[derive(Debug, Clone)]
pub struct Sparsity {
    num_rows: usize,
    num_cols: usize,
    row_offsets: Array1D<usize>,
    col_indices: Array1D<usize>,
}

impl Sparsity {
    /// Validates and uploads a CSR pattern. Columns within a row must be strictly increasing.
    pub fn try_from_offsets_and_indices(
        num_rows: usize,
        num_cols: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
    ) -> eyre::Result<Self> {
        ensure!(
            row_offsets.len() == num_rows + 1,
            "Sparsity: expected {} row offsets, got {}",
            num_rows + 1,
            row_offsets.len()
        );
        ensure!(row_offsets[0] == 0, "Sparsity: first row offset must be zero");
        ensure!(
            row_offsets[num_rows] == col_indices.len(),
            "Sparsity: last row offset {} does not match the number of entries {}",
            row_offsets[num_rows],
            col_indices.len()
        );
        for (row, pair) in row_offsets.windows(2).enumerate() {
            ensure!(pair[0] <= pair[1], "Sparsity: row offsets must be non-decreasing (row {})", row);
            ensure!(
                pair[1] <= col_indices.len(),
                "Sparsity: row offset {} of row {} exceeds the number of entries {}",
                pair[1],
                row,
                col_indices.len()
            );
        }
        for row in 0..num_rows {
            let columns = &col_indices[row_offsets[row]..row_offsets[row + 1]];
            ensure!(
                columns.windows(2).all(|pair| pair[0] < pair[1]),
                "Sparsity: columns of row {} are not strictly increasing",
                row
            );
            ensure!(
                columns.iter().all(|&col| col < num_cols),
                "Sparsity: row {} has a column out of range ({} columns)",
                row,
                num_cols
            );
        }
        Ok(Self {
            num_rows,
            num_cols,
            row_offsets: Array1D::from_slice(&row_offsets),
            col_indices: Array1D::from_slice(&col_indices),
        })
    }

    /// Builds the pattern holding every `(row, col)` coordinate, ignoring duplicates.
    pub fn from_coordinates(
        num_rows: usize,
        num_cols: usize,
        mut coordinates: Vec<(usize, usize)>,
    ) -> eyre::Result<Self> {
        coordinates.par_sort_unstable();

        let mut row_offsets = Vec::with_capacity(num_rows + 1);
        let mut col_indices = Vec::new();
        row_offsets.push(0);

        let mut current_row = 0;
        let mut prev_col = None;
        for (i, j) in coordinates {
            ensure!(i < num_rows, "Sparsity: coordinate row {} out of bounds ({} rows)", i, num_rows);
            while i > current_row {
                row_offsets.push(col_indices.len());
                current_row += 1;
                prev_col = None;
            }
            if Some(j) != prev_col {
                col_indices.push(j);
                prev_col = Some(j);
            }
        }
        for _ in current_row..num_rows {
            row_offsets.push(col_indices.len());
        }

        Self::try_from_offsets_and_indices(num_rows, num_cols, row_offsets, col_indices)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.size()
    }

    #[inline]
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.row_offsets.get(row)..self.row_offsets.get(row + 1)
    }

    pub fn row_columns(&self, row: usize) -> &[usize] {
        &self.col_indices.as_slice()[self.row_range(row)]
    }

    /// Position of entry `(row, col)` in the value array.
    #[inline]
    pub fn find(&self, row: usize, col: usize) -> Option<usize> {
        let range = self.row_range(row);
        let begin = range.start;
        self.col_indices.as_slice()[range]
            .binary_search(&col)
            .ok()
            .map(|k| begin + k)
    }

    pub fn row_offsets(&self) -> &Array1D<usize> {
        &self.row_offsets
    }

    pub fn col_indices(&self) -> &Array1D<usize> {
        &self.col_indices
    }
}

/// A CSR matrix sharing its pattern with other matrices of the same system.
#[derive(Debug)]
pub struct CsrMatrix {
    sparsity: Sparsity,
    values: Array1D<f64>,
}

impl CsrMatrix {
    pub fn new(sparsity: &Sparsity) -> eyre::Result<Self> {
        Ok(Self {
            sparsity: sparsity.clone(),
            values: Array1D::from_dims(&[sparsity.nnz()])?,
        })
    }

    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    pub fn values(&self) -> &Array1D<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array1D<f64> {
        &mut self.values
    }

    #[inline]
    pub fn find(&self, row: usize, col: usize) -> Option<usize> {
        self.sparsity.find(row, col)
    }

    /// The value of entry `(row, col)`, zero if it is not in the pattern.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.find(row, col)
            .map(|position| self.values.get(position))
            .unwrap_or(0.0)
    }

    /// Atomically adds `value` to entry `(row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not in the pattern.
    #[inline]
    pub fn atomic_add(&self, row: usize, col: usize, value: f64) {
        match self.find(row, col) {
            Some(position) => self.values.atomic_add(position, value),
            None => panic!("CsrMatrix: entry ({}, {}) is not in the sparsity pattern", row, col),
        }
    }

    /// Overwrites entry `(row, col)`.
    ///
    /// # Safety
    ///
    /// No other work-item may access the entry concurrently.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not in the pattern.
    pub unsafe fn write(&self, row: usize, col: usize, value: f64) {
        match self.find(row, col) {
            Some(position) => self.values.write(position, value),
            None => panic!("CsrMatrix: entry ({}, {}) is not in the sparsity pattern", row, col),
        }
    }

    /// Zeroes every stored entry of `row`.
    ///
    /// # Safety
    ///
    /// No other work-item may access the row concurrently.
    pub unsafe fn zero_row(&self, row: usize) {
        for position in self.sparsity.row_range(row) {
            self.values.write(position, 0.0);
        }
    }

    /// Zeroes both sides.
    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }

    /// The first `num_rows` rows as a solver matrix, read from the side in `space`.
    pub fn to_nalgebra_csr(
        &self,
        space: MemorySpace,
        num_rows: usize,
    ) -> eyre::Result<nalgebra_sparse::CsrMatrix<f64>> {
        ensure!(
            num_rows <= self.sparsity.num_rows(),
            "CsrMatrix: cannot extract {} rows from a matrix with {} rows",
            num_rows,
            self.sparsity.num_rows()
        );
        with_space(space, || {
            let offsets = self.sparsity.row_offsets.as_slice()[..=num_rows].to_vec();
            let nnz = offsets[num_rows];
            let indices = self.sparsity.col_indices.as_slice()[..nnz].to_vec();
            let values = self.values.as_slice()[..nnz].to_vec();
            nalgebra_sparse::CsrMatrix::try_from_csr_data(num_rows, self.sparsity.num_cols(), offsets, indices, values)
                .map_err(|err| eyre!("CsrMatrix: invalid CSR data: {}", err))
        })
    }
}
