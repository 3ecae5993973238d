// src/audio/mixer.rs
// SIMD helpers for the i32 mix bus: clear, gain/pan accumulate, saturate

use wide::{f32x4, i32x4};

/// Linear pan law: the far side attenuates, the near side stays at unity.
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan_l = if pan < 0.0 { 1.0 } else { 1.0 - pan };
    let pan_r = if pan > 0.0 { 1.0 } else { 1.0 + pan };
    (pan_l, pan_r)
}

/// Solo wins over mute: with any solo active only soloed tracks are heard.
#[inline]
pub fn is_audible(muted: bool, solo: bool, any_solo: bool) -> bool {
    if any_solo { solo } else { !muted }
}

/// One stereo frame scaled by level then pan, truncated toward zero.
#[inline]
pub fn scale_frame(left: i16, right: i16, level: f32, gains: (f32, f32)) -> (i32, i32) {
    (
        (left as f32 * level * gains.0) as i32,
        (right as f32 * level * gains.1) as i32,
    )
}

#[inline]
pub fn clear_simd(buffer: &mut [i32]) {
    let zero = i32x4::splat(0).to_array();
    let chunks = buffer.len() / 4;

    for i in 0..chunks {
        let idx = i * 4;
        buffer[idx..idx + 4].copy_from_slice(&zero);
    }

    for item in buffer.iter_mut().skip(chunks * 4) {
        *item = 0;
    }
}

/// `dest += src * level * pan` over interleaved stereo.
#[inline]
pub fn add_scaled_simd(dest: &mut [i32], src: &[i16], level: f32, pan: f32) {
    let (pan_l, pan_r) = pan_gains(pan);
    let level_vec = f32x4::splat(level);
    let pan_vec = f32x4::new([pan_l, pan_r, pan_l, pan_r]);
    let len = dest.len().min(src.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let src_vec = f32x4::new([
            src[idx] as f32,
            src[idx + 1] as f32,
            src[idx + 2] as f32,
            src[idx + 3] as f32,
        ]);
        let scaled = (src_vec * level_vec * pan_vec).to_array();
        for (d, s) in dest[idx..idx + 4].iter_mut().zip(scaled) {
            *d = d.saturating_add(s as i32);
        }
    }

    // Remainder is at most one stereo frame
    for frame in (chunks * 4..len).step_by(2) {
        if frame + 1 >= len {
            break;
        }
        let (l, r) = scale_frame(src[frame], src[frame + 1], level, (pan_l, pan_r));
        dest[frame] = dest[frame].saturating_add(l);
        dest[frame + 1] = dest[frame + 1].saturating_add(r);
    }
}

/// `out = clamp(mix + click)` into the i16 range. The bus is clamped before
/// the click is added so the sum cannot leave i32.
#[inline]
pub fn saturate_simd(mix: &[i32], click: &[i16], out: &mut [i16]) {
    let hi = i32x4::splat(i16::MAX as i32);
    let lo = i32x4::splat(i16::MIN as i32);
    let len = out.len().min(mix.len()).min(click.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let mix_vec = i32x4::new([mix[idx], mix[idx + 1], mix[idx + 2], mix[idx + 3]]);
        let click_vec = i32x4::new([
            click[idx] as i32,
            click[idx + 1] as i32,
            click[idx + 2] as i32,
            click[idx + 3] as i32,
        ]);
        let bus = mix_vec.max(lo).min(hi);
        let clamped = (bus + click_vec).max(lo).min(hi).to_array();
        for (o, s) in out[idx..idx + 4].iter_mut().zip(clamped) {
            *o = s as i16;
        }
    }

    for i in chunks * 4..len {
        let bus = mix[i].clamp(i16::MIN as i32, i16::MAX as i32);
        out[i] = (bus + click[i] as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}
