//! 拉普拉斯 (双边几何) 分布的熵编码.
//!
//! 总频率固定为 2^15. `fs` 为 0 的频率, `decay` 为相邻幅度的衰减 (Q15).
//! 尾部每个值至少保留 1 的频率, 因此任何整数都可以编码; 超出可表示
//! 范围的幅度会被截断, 编码函数返回实际编码的值.

use sheng_core::{RangeDecoder, RangeEncoder};

const MINP: u32 = 1;
const NMIN: u32 = 16;

fn freq1(fs0: u32, decay: u32) -> u32 {
    let ft = 32768 - MINP * (2 * NMIN) - fs0;
    (ft * (16384 - decay)) >> 15
}

/// 编码一个整数, 返回实际编码的值 (幅度过大时被截断)
pub fn encode_laplace(enc: &mut RangeEncoder, value: i32, fs: u32, decay: u32) -> i32 {
    let mut fl = 0u32;
    let mut fs = fs;
    let mut coded = value;
    if value != 0 {
        let negative = value < 0;
        let val = value.unsigned_abs();
        fl = fs;
        fs = freq1(fs, decay);
        let mut i = 1u32;
        while fs > 0 && i < val {
            fs *= 2;
            fl += fs + 2 * MINP;
            fs = (fs * decay) >> 15;
            i += 1;
        }
        if fs == 0 {
            let s = u32::from(negative);
            let ndi_max = ((32768 - fl) + s) >> 1;
            let di = (val - i).min(ndi_max.saturating_sub(1));
            fl += (2 * di + 1 - s) * MINP;
            fs = MINP.min(32768 - fl);
            let mag = (i + di) as i32;
            coded = if negative { -mag } else { mag };
        } else {
            fs += MINP;
            if !negative {
                fl += fs;
            }
        }
    }
    enc.encode_bin(fl, fl + fs, 15);
    coded
}

/// 在给定参数下可以无截断编码的最大幅度
pub fn max_magnitude(fs: u32, decay: u32) -> i32 {
    let mut fl = fs;
    let mut fs = freq1(fs, decay);
    let mut i = 1u32;
    while fs > 0 {
        fs *= 2;
        fl += fs + 2 * MINP;
        fs = (fs * decay) >> 15;
        i += 1;
    }
    let ndi_max = (32768 - fl) >> 1;
    (i + ndi_max.saturating_sub(1)) as i32
}

/// 解码一个整数
pub fn decode_laplace(dec: &mut RangeDecoder<'_>, fs: u32, decay: u32) -> i32 {
    let fm = dec.decode_bin(15);
    let mut val = 0i32;
    let mut fl = 0u32;
    let mut fs = fs;
    if fm >= fs {
        val += 1;
        fl = fs;
        fs = freq1(fs, decay) + MINP;
        while fs > MINP && fm >= fl + 2 * fs {
            fs *= 2;
            fl += fs;
            fs = ((fs - 2 * MINP) * decay) >> 15;
            fs += MINP;
            val += 1;
        }
        if fs <= MINP {
            let di = (fm - fl) >> 1;
            val += di as i32;
            fl += 2 * di * MINP;
        }
        if fm < fl + fs {
            val = -val;
        } else {
            fl += fs;
        }
    }
    let fh = (fl + fs).min(32768);
    dec.update(fl, fh - fl, 32768);
    val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_拉普拉斯往返() {
        let params = [
            (9000u32, 9000u32),
            (16000, 7000),
            (30000, 6000),
            (8000, 15000),
        ];
        let values: Vec<i32> = (-20..=20).chain([100, -100, 500]).collect();
        let mut enc = RangeEncoder::new(4000);
        let mut coded = Vec::new();
        for (k, &v) in values.iter().enumerate() {
            let (fs, decay) = params[k % params.len()];
            coded.push(encode_laplace(&mut enc, v, fs, decay));
        }
        let data = enc.finish().unwrap();
        let mut dec = RangeDecoder::new(&data);
        for (k, &want) in coded.iter().enumerate() {
            let (fs, decay) = params[k % params.len()];
            assert_eq!(decode_laplace(&mut dec, fs, decay), want, "第 {k} 个值");
        }
        // 小幅度值不会被截断
        assert_eq!(&coded[..41], &values[..41]);
    }

    #[test]
    fn test_巨大幅度被截断() {
        let mut enc = RangeEncoder::new(64);
        let coded = encode_laplace(&mut enc, 1_000_000, 16000, 7000);
        assert!(coded > 0 && coded < 1_000_000);
        let coded_neg = encode_laplace(&mut enc, -1_000_000, 16000, 7000);
        assert!(coded_neg < 0);
        let data = enc.finish().unwrap();
        let mut dec = RangeDecoder::new(&data);
        assert_eq!(decode_laplace(&mut dec, 16000, 7000), coded);
        assert_eq!(decode_laplace(&mut dec, 16000, 7000), coded_neg);
    }

    #[test]
    fn test_最大幅度恰好可编码() {
        let params = [
            (30000u32, 6000u32),
            (9000, 9000),
            (16000, 7000),
            (8000, 15000),
        ];
        for (fs, decay) in params {
            let max = max_magnitude(fs, decay);
            let mut enc = RangeEncoder::new(64);
            assert_eq!(encode_laplace(&mut enc, max, fs, decay), max);
            assert_eq!(encode_laplace(&mut enc, max + 1, fs, decay), max);
        }
        assert_eq!(max_magnitude(30000, 6000), 21);
    }

    #[test]
    fn test_零值代价最小() {
        let mut enc = RangeEncoder::new(64);
        let before = enc.tell_frac();
        encode_laplace(&mut enc, 0, 30000, 6000);
        let zero_cost = enc.tell_frac() - before;
        let before = enc.tell_frac();
        encode_laplace(&mut enc, 3, 30000, 6000);
        let three_cost = enc.tell_frac() - before;
        assert!(zero_cost < three_cost);
    }
}
