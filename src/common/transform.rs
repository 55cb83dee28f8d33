//! Scalar transform cores for the 4x4 residual DCT approximation, the
//! 4x4 and 2x2 Hadamard transforms used for DC coefficients, and their
//! inverses.
//!
//! These are pure butterfly networks. All normalization is folded into
//! the quantizer scale matrices, so the forward/inverse pairs here are
//! only matched through quantization: `inverse_dct4x4` expects
//! *dequantized* coefficients and produces samples that still carry the
//! final `(x + 32) >> 6` rounding, which the reconstruction step applies
//! when adding the prediction.

/// Forward 4x4 integer DCT approximation over a residual block in raster
/// order. No scaling is applied; the quantizer absorbs it.
pub fn forward_dct4x4(residual: &[i32; 16], out: &mut [i32; 16]) {
    let mut tmp = [0i32; 16];

    // Horizontal pass.
    for row in 0..4 {
        let r = &residual[row * 4..row * 4 + 4];
        let p0 = r[0] + r[3];
        let p1 = r[1] + r[2];
        let p2 = r[1] - r[2];
        let p3 = r[0] - r[3];
        tmp[row * 4] = p0 + p1;
        tmp[row * 4 + 1] = (p3 << 1) + p2;
        tmp[row * 4 + 2] = p0 - p1;
        tmp[row * 4 + 3] = p3 - (p2 << 1);
    }

    // Vertical pass.
    for col in 0..4 {
        let r0 = tmp[col];
        let r1 = tmp[4 + col];
        let r2 = tmp[8 + col];
        let r3 = tmp[12 + col];
        let p0 = r0 + r3;
        let p1 = r1 + r2;
        let p2 = r1 - r2;
        let p3 = r0 - r3;
        out[col] = p0 + p1;
        out[4 + col] = (p3 << 1) + p2;
        out[8 + col] = p0 - p1;
        out[12 + col] = p3 - (p2 << 1);
    }
}

/// Inverse 4x4 integer DCT over dequantized coefficients in raster order.
/// Output samples still carry a factor of 64; reconstruction applies
/// `(x + 32) >> 6` when adding the prediction.
pub fn inverse_dct4x4(coeffs: &[i32; 16], out: &mut [i32; 16]) {
    let mut tmp = [0i32; 16];

    // Horizontal pass.
    for row in 0..4 {
        let w = &coeffs[row * 4..row * 4 + 4];
        let e0 = w[0] + w[2];
        let e1 = w[0] - w[2];
        let e2 = (w[1] >> 1) - w[3];
        let e3 = w[1] + (w[3] >> 1);
        tmp[row * 4] = e0 + e3;
        tmp[row * 4 + 1] = e1 + e2;
        tmp[row * 4 + 2] = e1 - e2;
        tmp[row * 4 + 3] = e0 - e3;
    }

    // Vertical pass.
    for col in 0..4 {
        let w0 = tmp[col];
        let w1 = tmp[4 + col];
        let w2 = tmp[8 + col];
        let w3 = tmp[12 + col];
        let e0 = w0 + w2;
        let e1 = w0 - w2;
        let e2 = (w1 >> 1) - w3;
        let e3 = w1 + (w3 >> 1);
        out[col] = e0 + e3;
        out[4 + col] = e1 + e2;
        out[8 + col] = e1 - e2;
        out[12 + col] = e0 - e3;
    }
}

/// 4x4 Hadamard transform over luma DC coefficients. Self-inverse up to a
/// factor of 16; the forward direction folds its normalization into the
/// DC quantizer (one extra shift), the inverse into the DC dequantizer.
pub fn hadamard4x4(input: &[i32; 16], out: &mut [i32; 16]) {
    let mut tmp = [0i32; 16];

    for row in 0..4 {
        let r = &input[row * 4..row * 4 + 4];
        let p0 = r[0] + r[3];
        let p1 = r[1] + r[2];
        let p2 = r[1] - r[2];
        let p3 = r[0] - r[3];
        tmp[row * 4] = p0 + p1;
        tmp[row * 4 + 1] = p3 + p2;
        tmp[row * 4 + 2] = p0 - p1;
        tmp[row * 4 + 3] = p3 - p2;
    }

    for col in 0..4 {
        let r0 = tmp[col];
        let r1 = tmp[4 + col];
        let r2 = tmp[8 + col];
        let r3 = tmp[12 + col];
        let p0 = r0 + r3;
        let p1 = r1 + r2;
        let p2 = r1 - r2;
        let p3 = r0 - r3;
        out[col] = p0 + p1;
        out[4 + col] = p3 + p2;
        out[8 + col] = p0 - p1;
        out[12 + col] = p3 - p2;
    }
}

/// 2x2 Hadamard transform over one chroma plane's DC coefficients,
/// `[d00, d01, d10, d11]` in raster order. Self-inverse up to a factor
/// of 4.
pub fn hadamard2x2(input: &[i32; 4], out: &mut [i32; 4]) {
    let a = input[0] + input[1];
    let b = input[0] - input[1];
    let c = input[2] + input[3];
    let d = input[2] - input[3];
    out[0] = a + c;
    out[1] = b + d;
    out[2] = a - c;
    out[3] = b - d;
}
