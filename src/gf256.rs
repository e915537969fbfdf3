// Arithmetic over GF(2^8) with reduction polynomial 0x11B (x^8 + x^4 + x^3 + x + 1),
// the same field AES and Reed-Solomon use. Backs the Shamir secret-sharing scheme
// in `key_share_manager.rs` (see DESIGN.md for why XOR-with-threshold<N was rejected).

const GENERATOR: u8 = 0x03;

fn xtime(x: u8) -> u8 {
    let shifted = (x as u16) << 1;
    if shifted & 0x100 != 0 {
        (shifted ^ 0x11B) as u8
    } else {
        shifted as u8
    }
}

/// Multiply by the field generator (3 = x + 1): `xtime(x) ^ x`.
fn mul_by_generator(x: u8) -> u8 {
    xtime(x) ^ x
}

fn build_tables() -> ([u8; 256], [u8; 256]) {
    debug_assert_eq!(GENERATOR, 0x03);
    let mut exp = [0u8; 256];
    let mut log = [0u8; 256];
    let mut x: u8 = 1;
    for i in 0..255usize {
        exp[i] = x;
        log[x as usize] = i as u8;
        x = mul_by_generator(x);
    }
    exp[255] = exp[0];
    (exp, log)
}

struct Tables {
    exp: [u8; 256],
    log: [u8; 256],
}

fn tables() -> &'static Tables {
    use std::sync::OnceLock;
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let (exp, log) = build_tables();
        Tables { exp, log }
    })
}

/// GF(2^8) addition (and subtraction): bitwise XOR.
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// GF(2^8) multiplication via log/exp tables.
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let la = t.log[a as usize] as u16;
    let lb = t.log[b as usize] as u16;
    t.exp[((la + lb) % 255) as usize]
}

/// GF(2^8) multiplicative inverse. Panics on zero (callers never invert zero).
pub fn inv(a: u8) -> u8 {
    assert!(a != 0, "GF(2^8) zero has no inverse");
    let t = tables();
    let la = t.log[a as usize] as u16;
    t.exp[((255 - la) % 255) as usize]
}

/// GF(2^8) division `a / b`.
pub fn div(a: u8, b: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    mul(a, inv(b))
}

/// Evaluate a polynomial (coefficients low-to-high, `coeffs[0]` is the constant term)
/// at point `x` using Horner's method in GF(2^8).
pub fn eval_poly(coeffs: &[u8], x: u8) -> u8 {
    let mut result = 0u8;
    for &c in coeffs.iter().rev() {
        result = add(mul(result, x), c);
    }
    result
}

/// Lagrange interpolation at x=0 over the given `(x, y)` points, recovering the
/// polynomial's constant term (the shared secret byte).
pub fn interpolate_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut secret = 0u8;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut numerator = 1u8;
        let mut denominator = 1u8;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            // Lagrange basis at x=0: prod (0 - xj) / (xi - xj) == prod xj / (xi ^ xj) in GF(2^8).
            numerator = mul(numerator, xj);
            denominator = mul(denominator, add(xi, xj));
        }
        let basis = div(numerator, denominator);
        secret = add(secret, mul(yi, basis));
    }
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_is_commutative_and_has_identity() {
        for a in 1u8..=255 {
            assert_eq!(mul(a, 1), a);
            assert_eq!(mul(a, 0), 0);
        }
        assert_eq!(mul(7, 13), mul(13, 7));
    }

    #[test]
    fn inverse_round_trips() {
        for a in 1u8..=255 {
            assert_eq!(mul(a, inv(a)), 1, "a={a}");
        }
    }

    #[test]
    fn eval_poly_matches_constant_term_at_zero() {
        let coeffs = [42, 7, 200];
        assert_eq!(eval_poly(&coeffs, 0), 42);
    }

    #[test]
    fn interpolation_recovers_secret_from_any_threshold_subset() {
        // degree-2 polynomial (threshold 3), secret = 99
        let coeffs = [99u8, 55, 17];
        let points: Vec<(u8, u8)> = (1u8..=5).map(|x| (x, eval_poly(&coeffs, x))).collect();

        assert_eq!(interpolate_at_zero(&points[0..3]), 99);
        assert_eq!(interpolate_at_zero(&points[1..4]), 99);
        assert_eq!(interpolate_at_zero(&[points[0], points[2], points[4]]), 99);
    }
}
