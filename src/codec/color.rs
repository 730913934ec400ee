//! YCoCg-R to RGB conversion.

/// Convert one reversible YCoCg sample to RGB, clamped to 8 bits.
#[inline]
pub fn ycocg_to_rgb(y: i32, co: i32, cg: i32) -> [u8; 3] {
    let tmp = y - (cg >> 1);
    let g = cg + tmp;
    let b = tmp - (co >> 1);
    let r = b + co;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

/// Convert planar Y, Co, Cg samples into interleaved RGB8.
pub fn convert_to_rgb(y: &[i32], co: &[i32], cg: &[i32], out: &mut Vec<u8>) {
    debug_assert!(y.len() == co.len() && y.len() == cg.len());
    out.clear();
    out.reserve(y.len() * 3);
    for ((&y, &co), &cg) in y.iter().zip(co).zip(cg) {
        out.extend_from_slice(&ycocg_to_rgb(y, co, cg));
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_to_ycocg(r: i32, g: i32, b: i32) -> (i32, i32, i32) {
        let co = r - b;
        let tmp = b + (co >> 1);
        let cg = g - tmp;
        let y = tmp + (cg >> 1);
        (y, co, cg)
    }

    #[test]
    fn test_grey_has_zero_chroma() {
        assert_eq!(ycocg_to_rgb(128, 0, 0), [128, 128, 128]);
    }

    #[test]
    fn test_lossless_round_trip() {
        for &(r, g, b) in &[(0, 0, 0), (255, 255, 255), (255, 0, 0), (12, 200, 99), (1, 2, 254)] {
            let (y, co, cg) = rgb_to_ycocg(r, g, b);
            assert_eq!(ycocg_to_rgb(y, co, cg), [r as u8, g as u8, b as u8]);
        }
    }

    #[test]
    fn test_clamps_out_of_range() {
        assert_eq!(ycocg_to_rgb(400, 0, 0), [255, 255, 255]);
        assert_eq!(ycocg_to_rgb(-50, 0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_convert_planes() {
        let mut out = vec![1, 2, 3];
        convert_to_rgb(&[10, 20], &[0, 0], &[0, 0], &mut out);
        assert_eq!(out, vec![10, 10, 10, 20, 20, 20]);
    }
}
