//! Tone operators for 8-bit color composites.
//!
//! Operators are parsed from a compact text form, e.g.
//! `"gamma b 1.85, gamma rg 1.95"`, `"sigmoidal rgb 20 0.2"` or `"saturation 1.2"`,
//! and applied in order to a `[channel, y, x]` stack of reflectances in `[0, 1]`.
use ndarray::{par_azip, s, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default correction for Sentinel-2 true color
pub const DEFAULT_COLOR_OPS: &str = "gamma b 1.85, gamma rg 1.95";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToneOperator {
    /// `v^(1/gamma)` on the listed channels
    Gamma { channels: Vec<usize>, gamma: f32 },
    /// Sigmoidal contrast; negative contrast applies the inverse curve
    Sigmoidal {
        channels: Vec<usize>,
        contrast: f32,
        bias: f32,
    },
    /// LCh chroma scaling over all three channels
    Saturation { proportion: f32 },
}

fn op_error(op: &str, reason: impl Into<String>) -> Error {
    Error::ColorOperation {
        op: op.to_string(),
        reason: reason.into(),
    }
}

fn parse_channels(op: &str, spec: &str) -> Result<Vec<usize>> {
    let mut channels = Vec::new();
    for ch in spec.chars() {
        let idx = match ch.to_ascii_lowercase() {
            'r' | '1' => 0,
            'g' | '2' => 1,
            'b' | '3' => 2,
            other => return Err(op_error(op, format!("unknown channel `{}`", other))),
        };
        if !channels.contains(&idx) {
            channels.push(idx);
        }
    }
    if channels.is_empty() {
        return Err(op_error(op, "no channels given"));
    }
    Ok(channels)
}

fn parse_number(op: &str, token: &str) -> Result<f32> {
    token
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| op_error(op, format!("`{}` is not a finite number", token)))
}

/// Parse an operator pipeline. Commas are optional separators; an empty string
/// yields no operators.
pub fn parse_operations(text: &str) -> Result<Vec<ToneOperator>> {
    const NAMES: [&str; 3] = ["gamma", "sigmoidal", "saturation"];
    let cleaned = text.replace(',', " ");
    let mut groups: Vec<Vec<String>> = Vec::new();
    for token in cleaned.split_whitespace() {
        let token = token.to_ascii_lowercase();
        if NAMES.contains(&token.as_str()) {
            groups.push(vec![token]);
        } else if let Some(group) = groups.last_mut() {
            group.push(token);
        } else {
            return Err(op_error(&token, "not a valid operation"));
        }
    }

    groups
        .into_iter()
        .map(|parts| {
            let op = parts.join(" ");
            match parts.as_slice() {
                [name, channels, g] if name == "gamma" => {
                    let gamma = parse_number(&op, g)?;
                    if gamma <= 0.0 {
                        return Err(op_error(&op, "gamma must be greater than 0"));
                    }
                    Ok(ToneOperator::Gamma {
                        channels: parse_channels(&op, channels)?,
                        gamma,
                    })
                }
                [name, channels, contrast, bias] if name == "sigmoidal" => {
                    let bias = parse_number(&op, bias)?;
                    if !(0.0..=1.0).contains(&bias) {
                        return Err(op_error(&op, "bias must be between 0 and 1"));
                    }
                    Ok(ToneOperator::Sigmoidal {
                        channels: parse_channels(&op, channels)?,
                        contrast: parse_number(&op, contrast)?,
                        bias,
                    })
                }
                [name, p] if name == "saturation" => {
                    let proportion = parse_number(&op, p)?;
                    if proportion < 0.0 {
                        return Err(op_error(&op, "proportion must not be negative"));
                    }
                    Ok(ToneOperator::Saturation { proportion })
                }
                _ => Err(op_error(&op, "wrong number of arguments")),
            }
        })
        .collect()
}

fn sigmoidal(v: f32, contrast: f32, bias: f32) -> f32 {
    let alpha = if bias == 0.0 { f32::EPSILON } else { bias };
    let beta = contrast;
    if beta == 0.0 {
        return v;
    }
    let lo = 1.0 / (1.0 + (beta * alpha).exp());
    if beta > 0.0 {
        let hi = 1.0 / (1.0 + (beta * (alpha - 1.0)).exp());
        let num = 1.0 / (1.0 + (beta * (alpha - v)).exp()) - lo;
        num / (hi - lo)
    } else {
        let inner = v / (1.0 + (beta * alpha - beta).exp()) - v * lo + lo;
        (beta * alpha - (1.0 / inner - 1.0).ln()) / beta
    }
}

/// Apply a single-channel operator to channel `channel` of a `[channel, y, x]` stack.
pub fn correct_channel(rgb: &mut Array3<f32>, channel: usize, op: &ToneOperator) {
    let mut plane = rgb.index_axis_mut(Axis(0), channel);
    match *op {
        ToneOperator::Gamma { gamma, .. } => {
            let exp = 1.0 / gamma;
            par_azip!((v in &mut plane) *v = v.powf(exp));
        }
        ToneOperator::Sigmoidal { contrast, bias, .. } => {
            par_azip!((v in &mut plane) *v = sigmoidal(*v, contrast, bias));
        }
        ToneOperator::Saturation { .. } => {}
    }
}

// sRGB <-> CIE LCh(ab), D65 white
const WHITE: [f32; 3] = [0.95047, 1.0, 1.08883];
const LAB_EPS: f32 = 216.0 / 24389.0;
const LAB_KAPPA: f32 = 24389.0 / 27.0;

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn rgb_to_lch(r: f32, g: f32, b: f32) -> [f32; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));
    let xyz = [
        0.4124564 * r + 0.3575761 * g + 0.1804375 * b,
        0.2126729 * r + 0.7151522 * g + 0.0721750 * b,
        0.0193339 * r + 0.1191920 * g + 0.9503041 * b,
    ];
    let f = |t: f32| {
        if t > LAB_EPS {
            t.cbrt()
        } else {
            (LAB_KAPPA * t + 16.0) / 116.0
        }
    };
    let fx = f(xyz[0] / WHITE[0]);
    let fy = f(xyz[1] / WHITE[1]);
    let fz = f(xyz[2] / WHITE[2]);
    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let bb = 200.0 * (fy - fz);
    [l, a.hypot(bb), bb.atan2(a)]
}

fn lch_to_rgb(l: f32, c: f32, h: f32) -> [f32; 3] {
    let (a, bb) = (c * h.cos(), c * h.sin());
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - bb / 200.0;
    let finv = |t: f32| {
        let t3 = t * t * t;
        if t3 > LAB_EPS {
            t3
        } else {
            (116.0 * t - 16.0) / LAB_KAPPA
        }
    };
    let x = finv(fx) * WHITE[0];
    let y = if l > LAB_KAPPA * LAB_EPS {
        fy * fy * fy
    } else {
        l / LAB_KAPPA
    } * WHITE[1];
    let z = finv(fz) * WHITE[2];
    let r = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let g = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let b = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;
    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)]
}

/// Scale LCh chroma of every pixel by `proportion`.
pub fn saturate(rgb: &mut Array3<f32>, proportion: f32) {
    let (mut r, mut g, mut b) =
        rgb.multi_slice_mut((s![0, .., ..], s![1, .., ..], s![2, .., ..]));
    par_azip!((r in &mut r, g in &mut g, b in &mut b) {
        let [l, c, h] = rgb_to_lch(*r, *g, *b);
        let [nr, ng, nb] = lch_to_rgb(l, c * proportion, h);
        *r = nr;
        *g = ng;
        *b = nb;
    });
}

/// Apply `ops` in order to a `[3, y, x]` stack.
pub fn apply_operations(rgb: &mut Array3<f32>, ops: &[ToneOperator]) {
    for op in ops {
        match op {
            ToneOperator::Gamma { channels, .. } | ToneOperator::Sigmoidal { channels, .. } => {
                for &c in channels {
                    correct_channel(rgb, c, op);
                }
            }
            ToneOperator::Saturation { proportion } => saturate(rgb, *proportion),
        }
    }
}

/// Build an 8-bit `[3, y, x]` composite from three reflectance planes:
/// missing values become 0, inputs are clipped to `[0, 1]`, `ops` are applied
/// and the result is scaled by 255 and truncated.
pub fn color_composite(
    channels: [ArrayView2<'_, f32>; 3],
    ops: &[ToneOperator],
) -> Result<Array3<u8>> {
    let dim = channels[0].dim();
    if channels.iter().any(|c| c.dim() != dim) {
        return Err(Error::GridMismatch {
            expected: format!("{:?}", dim),
            actual: format!("{:?}", channels.iter().map(|c| c.dim()).collect::<Vec<_>>()),
        });
    }
    let mut rgb = Array3::<f32>::zeros((3, dim.0, dim.1));
    for (i, ch) in channels.iter().enumerate() {
        par_azip!((dst in rgb.index_axis_mut(Axis(0), i), &v in ch) {
            *dst = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        });
    }
    apply_operations(&mut rgb, ops);
    Ok(rgb.mapv(|v| {
        if v.is_finite() {
            (v.clamp(0.0, 1.0) * 255.0) as u8
        } else {
            0
        }
    }))
}
