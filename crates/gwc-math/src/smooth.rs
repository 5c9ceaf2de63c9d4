//! Gaussian kernel smoothing for binned density estimation.

/// A normalized 1-D Gaussian kernel with standard deviation `sigma_bins`
/// (in bin units), truncated at `truncation` standard deviations.
pub fn gaussian_kernel(sigma_bins: f64, truncation: f64) -> Vec<f64> {
    assert!(sigma_bins > 0.0 && truncation > 0.0);
    let half = (sigma_bins * truncation).floor() as usize;
    let mut kernel = Vec::with_capacity(2 * half + 1);
    for k in -(half as isize)..=(half as isize) {
        let z = k as f64 / sigma_bins;
        kernel.push((-0.5 * z * z).exp());
    }
    let total: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= total;
    }
    kernel
}

/// Separable 2-D convolution of a row-major `(nx, ny)` array with the
/// outer product of two 1-D kernels. Edges are zero-padded, matching the
/// behaviour the density surfaces expect: mass near the array boundary
/// bleeds off rather than reflecting.
pub fn filter_2d(array: &mut [f64], shape: (usize, usize), kx: &[f64], ky: &[f64]) {
    let (nx, ny) = shape;
    assert_eq!(array.len(), nx * ny);

    // along y (contiguous rows)
    let mut row = vec![0.0; ny];
    let hy = ky.len() / 2;
    for i in 0..nx {
        let base = i * ny;
        row.copy_from_slice(&array[base..base + ny]);
        for j in 0..ny {
            let mut acc = 0.0;
            for (k, w) in ky.iter().enumerate() {
                let src = j as isize + k as isize - hy as isize;
                if src >= 0 && (src as usize) < ny {
                    acc += w * row[src as usize];
                }
            }
            array[base + j] = acc;
        }
    }

    // along x (strided columns)
    let mut col = vec![0.0; nx];
    let hx = kx.len() / 2;
    for j in 0..ny {
        for (i, c) in col.iter_mut().enumerate() {
            *c = array[i * ny + j];
        }
        for i in 0..nx {
            let mut acc = 0.0;
            for (k, w) in kx.iter().enumerate() {
                let src = i as isize + k as isize - hx as isize;
                if src >= 0 && (src as usize) < nx {
                    acc += w * col[src as usize];
                }
            }
            array[i * ny + j] = acc;
        }
    }
}
