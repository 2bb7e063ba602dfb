/// Poor man's approx assertion for scalars
#[macro_export]
macro_rules! assert_scalar_close {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let x: f64 = $x;
        let y: f64 = $y;
        let absdiff = (x - y).abs();
        if !(absdiff <= $tol) {
            panic!(
                "assert_scalar_close!({}, {}) failed: left = {:e}, right = {:e}, diff = {:e}, abstol = {:e}",
                stringify!($x),
                stringify!($y),
                x,
                y,
                absdiff,
                $tol
            );
        }
    }};
}

/// Poor man's approx assertion for slices of scalars
#[macro_export]
macro_rules! assert_slices_close {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let x: &[f64] = $x;
        let y: &[f64] = $y;
        assert_eq!(x.len(), y.len(), "slices must have the same length");
        for (i, (a, b)) in x.iter().zip(y.iter()).enumerate() {
            if !((a - b).abs() <= $tol) {
                println!("left: {:?}", x);
                println!("right: {:?}", y);
                panic!("slices differ at index {}: {:e} vs {:e} (abstol = {:e})", i, a, b, $tol);
            }
        }
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

pub fn prefix_sum(counts: impl IntoIterator<Item = usize>, x0: usize) -> impl Iterator<Item = usize> {
    counts.into_iter().scan(x0, |sum, x| {
        let current = *sum;
        *sum += x;
        Some(current)
    })
}
