use itertools::Itertools;
use nalgebra::DMatrix;
use std::iter::once;
use std::mem;
use std::ops::{Add, Neg};

#[allow(non_camel_case_types)]
type float = f64;

/// Coordinate list of a block-structured sparse matrix under construction.
#[derive(Clone, Debug)]
pub struct Builder {
    coords: Vec<(usize, usize, float)>,
    nrows: usize,
    ncols: usize,
}

impl Builder {
    pub fn with_capacity(nrows: usize, ncols: usize, nnz: usize) -> Builder {
        Builder {
            coords: Vec::with_capacity(nnz),
            nrows,
            ncols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn build_csc(&mut self) -> CscMatrix {
        // Sort and sum any duplicates in the same cell
        let mut coords = mem::take(&mut self.coords);
        coords.sort_unstable_by_key(|&(r, c, _)| (c, r));
        self.coords = coords
            .into_iter()
            .coalesce(|l, r| {
                if l.0 == r.0 && l.1 == r.1 {
                    Ok((l.0, l.1, l.2 + r.2))
                } else {
                    Err((l, r))
                }
            })
            .collect();

        let mut indptr = vec![0; self.ncols + 1];
        let mut indices = vec![0; self.coords.len()];
        let mut data = vec![0.0; self.coords.len()];

        // Fill in CSC column start and end pointer and row index
        let mut last_c = 0;
        for (i, &(r, c, val)) in self.coords.iter().enumerate() {
            while last_c < c {
                last_c += 1;
                indptr[last_c] = i;
            }
            indices[i] = r;
            data[i] = val;
        }
        // Set the remaining column index pointers to one past the end of the data array
        while last_c < self.ncols {
            last_c += 1;
            indptr[last_c] = self.coords.len();
        }

        CscMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            data,
        }
    }
}

impl AsRef<Builder> for Builder {
    fn as_ref(&self) -> &Builder {
        self
    }
}

impl Add for Builder {
    type Output = Builder;

    fn add(self, other: Builder) -> Builder {
        add(&[self, other])
    }
}

impl Neg for Builder {
    type Output = Builder;

    fn neg(mut self) -> Builder {
        for (_, _, val) in &mut self.coords {
            *val = -*val;
        }
        self
    }
}

pub fn zeros(nrows: usize, ncols: usize) -> Builder {
    Builder::with_capacity(nrows, ncols, 0)
}

pub fn eye(n: usize) -> Builder {
    let mut builder = Builder::with_capacity(n, n, n);
    for i in 0..n {
        builder.coords.push((i, i, 1.0));
    }
    builder
}

pub fn diags(n: usize, vals: &[float], diag: &[isize]) -> Builder {
    let cap = diag.iter().map(|&d| n - d.unsigned_abs()).sum();
    let mut builder = Builder::with_capacity(n, n, cap);

    for (&k, &v) in diag.iter().zip(vals) {
        assert!(k.unsigned_abs() < n);
        if k >= 0 {
            let k = k as usize;
            for i in 0..(n - k) {
                builder.coords.push((i, i + k, v));
            }
        } else {
            let k = k.unsigned_abs();
            for i in 0..(n - k) {
                builder.coords.push((i + k, i, v));
            }
        }
    }
    builder
}

pub fn block(block: &DMatrix<float>) -> Builder {
    let (nrows, ncols) = block.shape();

    let coords = (0..nrows)
        .flat_map(move |r| (0..ncols).map(move |c| (r, c, block[(r, c)])))
        .filter(|&(_, _, val)| val != 0.0)
        .collect();

    Builder {
        coords,
        nrows,
        ncols,
    }
}

/// `kron(I_n, block)`: `n` copies of `block` along the diagonal.
pub fn kron_eye(n: usize, block: &DMatrix<float>) -> Builder {
    let b = self::block(block);
    block_diag(&vec![&b; n])
}

pub fn add<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *nrows, block.nrows,
            "matrices being added must have the same number of rows"
        );
        assert_eq!(
            *ncols, block.ncols,
            "matrices being added must have the same number of columns"
        );
        block_merge(acc, block, 0, 0);
    }

    let (nrows, ncols) = blocks
        .first()
        .map(AsRef::as_ref)
        .map(|b| (b.nrows, b.ncols))
        .unwrap_or((0, 0));
    merge_op(blocks, nrows, ncols, op)
}

pub fn hstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *nrows, block.nrows,
            "hstack requires matrices to have the same number of rows"
        );
        block_merge(acc, block, 0, *ncols);
        *ncols += block.ncols;
    }

    let nrows = blocks.first().map(|b| b.as_ref().nrows).unwrap_or(0);
    merge_op(blocks, nrows, 0, op)
}

pub fn vstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *ncols, block.ncols,
            "vstack requires matrices to have the same number of columns"
        );
        block_merge(acc, block, *nrows, 0);
        *nrows += block.nrows;
    }

    let ncols = blocks.first().map(|b| b.as_ref().ncols).unwrap_or(0);
    merge_op(blocks, 0, ncols, op)
}

pub fn block_diag<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        block_merge(acc, block, *nrows, *ncols);
        *nrows += block.nrows;
        *ncols += block.ncols;
    }

    merge_op(blocks, 0, 0, op)
}

pub fn bmat<B: AsRef<Builder>>(blocks: &[&[Option<B>]]) -> Builder {
    let nrows = blocks.len();
    if nrows == 0 {
        return zeros(0, 0);
    }
    let ncols = blocks[0].len();
    assert!(
        blocks.iter().all(|row| row.len() == ncols),
        "bmat must be given a rectangular layout"
    );

    // Check that all blocks in a row/column must have the same number of rows/columns
    let mut block_nrows = vec![usize::MAX; nrows];
    let mut block_ncols = vec![usize::MAX; ncols];
    fn check_or_assign(left: &mut usize, right: usize, name: &str) {
        assert!(right != usize::MAX);
        if *left == usize::MAX {
            *left = right;
        } else {
            assert_eq!(
                *left, right,
                "bmat requires all blocks in a {0} to have the same number of {0}s",
                name,
            );
        }
    }
    for (row, nrows) in blocks.iter().zip(&mut block_nrows) {
        for (block, ncols) in row.iter().zip(&mut block_ncols) {
            if let Some(block) = block {
                let block = block.as_ref();
                check_or_assign(nrows, block.nrows, "row");
                check_or_assign(ncols, block.ncols, "column");
            }
        }
    }

    // Calculate row and column offsets and check that the resulting matrix has a known size
    fn cumsum(vals: &mut [usize], name: &str) {
        let mut acc = 0;
        for n in vals {
            if *n == usize::MAX {
                panic!("bmat requires all {}s to have a known size", name);
            }
            acc += *n;
            *n = acc;
        }
    }
    cumsum(&mut block_nrows, "row");
    cumsum(&mut block_ncols, "column");

    // Merge the blocks
    let mut acc = preallocate_for_merge(
        blocks
            .iter()
            .flat_map(|r| r.iter().filter_map(Option::as_ref))
            .map(AsRef::as_ref),
    );
    acc.nrows = block_nrows[nrows - 1];
    acc.ncols = block_ncols[ncols - 1];

    blocks
        .iter()
        .zip(once(&0).chain(&block_nrows))
        .fold(acc, |acc, (row, &row_offset)| {
            row.iter()
                .zip(once(&0).chain(&block_ncols))
                .fold(acc, |mut acc, (block, &col_offset)| {
                    if let Some(block) = block {
                        block_merge(&mut acc, block.as_ref(), row_offset, col_offset);
                    }
                    acc
                })
        })
}

fn preallocate_for_merge<'a>(blocks: impl Iterator<Item = &'a Builder>) -> Builder {
    let nnz = blocks.map(|b| b.coords.len()).sum();
    Builder::with_capacity(0, 0, nnz)
}

fn merge_op<B: AsRef<Builder>>(
    blocks: &[B],
    nrows: usize,
    ncols: usize,
    op: fn(&mut Builder, &mut usize, &mut usize, &Builder),
) -> Builder {
    let acc = preallocate_for_merge(blocks.iter().map(AsRef::as_ref));

    let (mut acc, final_nrows, final_ncols) = blocks.iter().map(AsRef::as_ref).fold(
        (acc, nrows, ncols),
        |(mut acc, mut nrows, mut ncols), block| {
            op(&mut acc, &mut nrows, &mut ncols, block);
            (acc, nrows, ncols)
        },
    );

    acc.nrows = final_nrows;
    acc.ncols = final_ncols;
    acc
}

fn block_merge(left: &mut Builder, right: &Builder, row_shift: usize, col_shift: usize) {
    let left_coords_len = left.coords.len();
    left.coords.extend_from_slice(&right.coords);

    // Update right coordinates
    for (r, c, _) in &mut left.coords[left_coords_len..] {
        *r += row_shift;
        *c += col_shift;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<float>,
}

impl CscMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[float] {
        &self.data
    }

    /// Keeps only the entries on or above the diagonal.
    pub fn upper_triangular(&self) -> CscMatrix {
        let mut indptr = Vec::with_capacity(self.ncols + 1);
        let mut indices = Vec::with_capacity(self.indices.len());
        let mut data = Vec::with_capacity(self.data.len());

        indptr.push(0);
        for c in 0..self.ncols {
            for i in self.indptr[c]..self.indptr[c + 1] {
                if self.indices[i] <= c {
                    indices.push(self.indices[i]);
                    data.push(self.data[i]);
                }
            }
            indptr.push(indices.len());
        }

        CscMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            data,
        }
    }

    pub fn mul_vec(&self, x: &[float]) -> Vec<float> {
        assert_eq!(x.len(), self.ncols);
        let mut y = vec![0.0; self.nrows];
        for (c, &x_c) in x.iter().enumerate() {
            for i in self.indptr[c]..self.indptr[c + 1] {
                y[self.indices[i]] += self.data[i] * x_c;
            }
        }
        y
    }

    pub fn to_dense(&self) -> DMatrix<float> {
        let mut mat = DMatrix::zeros(self.nrows, self.ncols);

        for c in 0..self.ncols {
            for i in self.indptr[c]..self.indptr[c + 1] {
                let r = self.indices[i];
                mat[(r, c)] = self.data[i];
            }
        }

        mat
    }
}
