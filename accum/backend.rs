//! Dense storage the updater scatters rank-one contributions into.
//!
//! The updater never holds a `&mut` to the whole matrix while it runs. It captures a raw
//! handle once, at construction, from an exclusive borrow, and each call touches only
//! the block its lock guards. Backends therefore work against handles, not `&mut self`.

use ndarray::{ArrayBase, ArrayView1, DataMut, Ix2, RawArrayViewMut, s};

/// Matrix storage that supports the two in-place updates the accumulator needs.
///
/// # Safety
/// Implementors guarantee that a handle taken by [`MatrixBackend::handle`] stays valid
/// for every element of the `dims()` rectangle for as long as the exclusive borrow it
/// was taken from lives, and that the update functions write only the requested
/// elements.
pub unsafe trait MatrixBackend {
    type Handle: Copy;

    /// `(rows, cols)`.
    fn dims(&self) -> (usize, usize);

    fn handle(&mut self) -> Self::Handle;

    /// `A[row_start + i, col_start + j] += scalar * rows[i] * cols[j]`.
    ///
    /// # Safety
    /// The block must lie inside `dims()`, and no other thread may touch it for the
    /// duration of the call.
    unsafe fn add_outer(
        handle: Self::Handle,
        row_start: usize,
        col_start: usize,
        rows: ArrayView1<'_, f64>,
        cols: ArrayView1<'_, f64>,
        scalar: f64,
    );

    /// `A[start + i, start + j] += scalar * v[i] * v[j]` for `j <= i` only.
    ///
    /// # Safety
    /// Same as [`MatrixBackend::add_outer`] for the square block at `(start, start)`.
    unsafe fn add_lower_rank_one(
        handle: Self::Handle,
        start: usize,
        v: ArrayView1<'_, f64>,
        scalar: f64,
    );
}

unsafe impl<S> MatrixBackend for ArrayBase<S, Ix2>
where
    S: DataMut<Elem = f64>,
{
    type Handle = RawArrayViewMut<f64, Ix2>;

    fn dims(&self) -> (usize, usize) {
        self.dim()
    }

    fn handle(&mut self) -> Self::Handle {
        self.raw_view_mut()
    }

    unsafe fn add_outer(
        handle: Self::Handle,
        row_start: usize,
        col_start: usize,
        rows: ArrayView1<'_, f64>,
        cols: ArrayView1<'_, f64>,
        scalar: f64,
    ) {
        let col_end = col_start + cols.len();
        for (i, &r) in rows.iter().enumerate() {
            let row = handle.slice_move(s![row_start + i, col_start..col_end]);
            let mut row = unsafe { row.deref_into_view_mut() };
            row.scaled_add(scalar * r, &cols);
        }
    }

    unsafe fn add_lower_rank_one(
        handle: Self::Handle,
        start: usize,
        v: ArrayView1<'_, f64>,
        scalar: f64,
    ) {
        for (i, &vi) in v.iter().enumerate() {
            // Row `start + i` only reaches the diagonal; the strict upper part stays untouched.
            let row = handle.slice_move(s![start + i, start..=start + i]);
            let mut row = unsafe { row.deref_into_view_mut() };
            row.scaled_add(scalar * vi, &v.slice(s![..=i]));
        }
    }
}

/// Base pointer and strides of a `faer::Mat<f64>`.
#[derive(Clone, Copy, Debug)]
pub struct FaerHandle {
    ptr: *mut f64,
    row_stride: isize,
    col_stride: isize,
}

impl FaerHandle {
    #[inline]
    unsafe fn at(self, row: usize, col: usize) -> *mut f64 {
        let offset = row as isize * self.row_stride + col as isize * self.col_stride;
        unsafe { self.ptr.offset(offset) }
    }
}

unsafe impl MatrixBackend for faer::Mat<f64> {
    type Handle = FaerHandle;

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn handle(&mut self) -> Self::Handle {
        let mut view = self.as_mut();
        let row_stride = view.row_stride();
        let col_stride = view.col_stride();
        FaerHandle {
            ptr: view.as_ptr_mut(),
            row_stride,
            col_stride,
        }
    }

    unsafe fn add_outer(
        handle: Self::Handle,
        row_start: usize,
        col_start: usize,
        rows: ArrayView1<'_, f64>,
        cols: ArrayView1<'_, f64>,
        scalar: f64,
    ) {
        // faer storage is column-major, so walk columns in the outer loop.
        for (j, &c) in cols.iter().enumerate() {
            let weight = scalar * c;
            for (i, &r) in rows.iter().enumerate() {
                unsafe { *handle.at(row_start + i, col_start + j) += weight * r };
            }
        }
    }

    unsafe fn add_lower_rank_one(
        handle: Self::Handle,
        start: usize,
        v: ArrayView1<'_, f64>,
        scalar: f64,
    ) {
        for (j, &vj) in v.iter().enumerate() {
            let weight = scalar * vj;
            for i in j..v.len() {
                unsafe { *handle.at(start + i, start + j) += weight * v[i] };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn ndarray_outer_lands_in_the_requested_block() {
        let mut a = Array2::<f64>::zeros((4, 4));
        let handle = a.handle();
        unsafe {
            <Array2<f64> as MatrixBackend>::add_outer(
                handle,
                2,
                0,
                array![1.0, 2.0].view(),
                array![3.0, 4.0, 5.0].view(),
                2.0,
            );
        }
        let expected = array![
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [6.0, 8.0, 10.0, 0.0],
            [12.0, 16.0, 20.0, 0.0],
        ];
        assert_eq!(a, expected);
    }

    #[test]
    fn ndarray_rank_one_writes_only_the_lower_triangle() {
        let mut a = Array2::<f64>::from_elem((3, 3), -1.0);
        let handle = a.handle();
        unsafe {
            <Array2<f64> as MatrixBackend>::add_lower_rank_one(
                handle,
                0,
                array![1.0, 2.0, 3.0].view(),
                1.0,
            );
        }
        let expected = array![[0.0, -1.0, -1.0], [1.0, 3.0, -1.0], [2.0, 5.0, 8.0]];
        assert_eq!(a, expected);
    }

    #[test]
    fn ndarray_handles_strided_views() {
        let mut backing = Array2::<f64>::zeros((6, 6));
        {
            let mut every_other = backing.slice_mut(s![..;2, ..;2]);
            let handle = every_other.handle();
            unsafe {
                <ndarray::ArrayViewMut2<'_, f64> as MatrixBackend>::add_lower_rank_one(
                    handle,
                    1,
                    array![1.0, 1.0].view(),
                    1.0,
                );
            }
        }
        assert_eq!(backing[(2, 2)], 1.0);
        assert_eq!(backing[(4, 2)], 1.0);
        assert_eq!(backing[(4, 4)], 1.0);
        assert_eq!(backing[(2, 4)], 0.0);
        assert_eq!(backing.sum(), 3.0);
    }

    #[test]
    fn faer_matches_ndarray() {
        let rows = array![1.0, -2.0, 3.0];
        let cols = array![4.0, 5.0];
        let v = array![2.0, 0.5, -1.0, 7.0];

        let mut dense = Array2::<f64>::zeros((7, 7));
        let mut mat = faer::Mat::<f64>::zeros(7, 7);
        let dense_handle = dense.handle();
        let faer_handle = mat.handle();
        unsafe {
            <Array2<f64> as MatrixBackend>::add_outer(dense_handle, 4, 1, rows.view(), cols.view(), 0.5);
            <Array2<f64> as MatrixBackend>::add_lower_rank_one(dense_handle, 2, v.view(), 3.0);
            <faer::Mat<f64> as MatrixBackend>::add_outer(faer_handle, 4, 1, rows.view(), cols.view(), 0.5);
            <faer::Mat<f64> as MatrixBackend>::add_lower_rank_one(faer_handle, 2, v.view(), 3.0);
        }
        for i in 0..7 {
            for j in 0..7 {
                assert_eq!(dense[(i, j)], mat[(i, j)], "mismatch at ({i}, {j})");
            }
        }
    }
}
