//! Persistence of the full engine state as a line-oriented text file.
//!
//! The format is `#key=value` header lines followed by whitespace
//! delimited data rows. Floats are written with Rust's shortest
//! round-trip `Display`, so a save/load cycle reproduces every stored
//! number exactly.

use crate::config::InversionConfig;
use crate::error::{PriftError, Result};
use crate::invertor::{InversionResult, Invertor};
use ndarray::{Array1, Array2};
use std::fmt::Write as _;
use std::path::Path;

/// Format version accepted by the loader.
const STATE_VERSION: u32 = 1;

/// Write the engine state to `path`, replacing any existing file.
pub(crate) fn save<P: AsRef<Path>>(invertor: &Invertor, path: P) -> Result<()> {
    std::fs::write(path, render_state(invertor))?;
    Ok(())
}

/// Restore an engine from a state file written by [`save`].
pub(crate) fn load<P: AsRef<Path>>(path: P) -> Result<Invertor> {
    let text = std::fs::read_to_string(path)?;
    parse_state(&text)
}

/// Render the state to its text form.
pub(crate) fn render_state(invertor: &Invertor) -> String {
    let config = invertor.config();
    let data = invertor.data();
    let mut out = String::new();

    // Writing to a String cannot fail, so the fmt results are ignored.
    let _ = writeln!(out, "#prift_state={}", STATE_VERSION);
    let _ = writeln!(out, "#d_max={}", config.d_max);
    let _ = writeln!(out, "#alpha={}", config.alpha);
    let _ = writeln!(out, "#nfunc={}", stored_nfunc(invertor));
    let _ = writeln!(out, "#background={}", config.background);
    let _ = writeln!(out, "#est_bck={}", u8::from(config.est_bck));
    let _ = writeln!(out, "#q_min={}", render_bound(data.q_min()));
    let _ = writeln!(out, "#q_max={}", render_bound(data.q_max()));
    let _ = writeln!(out, "#slit_width={}", data.slit_width());
    let _ = writeln!(out, "#slit_height={}", data.slit_height());

    if let Some(result) = invertor.result() {
        let _ = writeln!(out, "#chi2={}", result.chi2);
        let _ = writeln!(out, "#elapsed={}", result.elapsed);
        let _ = writeln!(out, "#coef={}", render_floats(result.out.iter()));
        for (i, row) in result.cov.rows().into_iter().enumerate() {
            let _ = writeln!(out, "#cov_row_{}={}", i, render_floats(row.iter()));
        }
    }

    let _ = writeln!(out, "#data={}", data.len());
    for i in 0..data.len() {
        let _ = writeln!(out, "{} {} {}", data.x()[i], data.y()[i], data.err()[i]);
    }
    out
}

/// Parse the text form of the state.
///
/// Unknown header keys are ignored so newer writers stay readable;
/// unknown versions and malformed values are rejected with
/// [`PriftError::ParseError`].
pub(crate) fn parse_state(text: &str) -> Result<Invertor> {
    let lines: Vec<&str> = text.lines().collect();
    let mut pos = 0;

    // The first non-empty line carries the version tag.
    while pos < lines.len() && lines[pos].trim().is_empty() {
        pos += 1;
    }
    let version_line = lines
        .get(pos)
        .ok_or_else(|| PriftError::ParseError("empty state file".to_string()))?;
    match split_header(version_line) {
        Some(("prift_state", value)) => {
            let version: u32 = value.trim().parse().map_err(|_| {
                PriftError::ParseError(format!("invalid state version '{}'", value))
            })?;
            if version != STATE_VERSION {
                return Err(PriftError::ParseError(format!(
                    "unsupported state version {}",
                    version
                )));
            }
        }
        _ => {
            return Err(PriftError::ParseError(
                "missing #prift_state header".to_string(),
            ));
        }
    }
    pos += 1;

    let mut config = InversionConfig::default();
    let mut q_min = None;
    let mut q_max = None;
    let mut slit_width = 0.0;
    let mut slit_height = 0.0;
    let mut chi2 = 0.0;
    let mut elapsed = 0.0;
    let mut coef: Option<Vec<f64>> = None;
    let mut cov_rows: Vec<(usize, Vec<f64>)> = Vec::new();
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut err = Vec::new();

    while pos < lines.len() {
        let line = lines[pos].trim();
        pos += 1;
        if line.is_empty() {
            continue;
        }
        let (key, value) = split_header(line).ok_or_else(|| {
            PriftError::ParseError(format!("unexpected line outside data block: '{}'", line))
        })?;
        match key {
            "d_max" => config.d_max = parse_float(key, value)?,
            "alpha" => config.alpha = parse_float(key, value)?,
            "background" => config.background = parse_float(key, value)?,
            "est_bck" => {
                config.est_bck = match value.trim() {
                    "0" => false,
                    "1" => true,
                    other => {
                        return Err(PriftError::ParseError(format!(
                            "est_bck must be 0 or 1, got '{}'",
                            other
                        )));
                    }
                }
            }
            "q_min" => q_min = parse_bound(key, value)?,
            "q_max" => q_max = parse_bound(key, value)?,
            "slit_width" => slit_width = parse_float(key, value)?,
            "slit_height" => slit_height = parse_float(key, value)?,
            "chi2" => chi2 = parse_float(key, value)?,
            "elapsed" => elapsed = parse_float(key, value)?,
            "coef" => coef = Some(parse_floats(key, value)?),
            "data" => {
                let npts: usize = value.trim().parse().map_err(|_| {
                    PriftError::ParseError(format!("invalid point count '{}'", value))
                })?;
                while x.len() < npts {
                    let row = lines.get(pos).ok_or_else(|| {
                        PriftError::ParseError(format!(
                            "data block ended after {} of {} rows",
                            x.len(),
                            npts
                        ))
                    })?;
                    pos += 1;
                    if row.trim().is_empty() {
                        continue;
                    }
                    let fields = parse_floats("data", row)?;
                    if fields.len() != 3 {
                        return Err(PriftError::ParseError(format!(
                            "data row needs 3 columns, got {}: '{}'",
                            fields.len(),
                            row.trim()
                        )));
                    }
                    x.push(fields[0]);
                    y.push(fields[1]);
                    err.push(fields[2]);
                }
            }
            _ => {
                if let Some(index) = key.strip_prefix("cov_row_") {
                    let index: usize = index.parse().map_err(|_| {
                        PriftError::ParseError(format!("invalid covariance row key '{}'", key))
                    })?;
                    cov_rows.push((index, parse_floats(key, value)?));
                }
                // Other unknown keys are skipped.
            }
        }
    }

    let mut invertor = Invertor::new();
    invertor.set_d_max(config.d_max)?;
    invertor.set_alpha(config.alpha)?;
    invertor.set_background(config.background);
    invertor.set_est_bck(config.est_bck);
    if !x.is_empty() {
        invertor.set_data(
            Array1::from_vec(x),
            Array1::from_vec(y),
            Array1::from_vec(err),
        )?;
    }
    invertor.set_q_min(q_min);
    invertor.set_q_max(q_max);
    invertor.set_slit_width(slit_width)?;
    invertor.set_slit_height(slit_height)?;

    if let Some(coef) = coef {
        let cov = assemble_covariance(coef.len(), cov_rows)?;
        invertor.set_result(Some(InversionResult {
            out: Array1::from_vec(coef),
            cov,
            chi2,
            elapsed,
        }));
    }
    Ok(invertor)
}

fn stored_nfunc(invertor: &Invertor) -> usize {
    match invertor.result() {
        Some(result) if invertor.est_bck() => result.out.len().saturating_sub(1),
        Some(result) => result.out.len(),
        None => 0,
    }
}

fn render_bound(bound: Option<f64>) -> String {
    match bound {
        Some(value) => value.to_string(),
        None => "none".to_string(),
    }
}

fn render_floats<'a, I: Iterator<Item = &'a f64>>(values: I) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_header(line: &str) -> Option<(&str, &str)> {
    line.trim().strip_prefix('#')?.split_once('=')
}

fn parse_float(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| PriftError::ParseError(format!("invalid value for {}: '{}'", key, value)))
}

fn parse_bound(key: &str, value: &str) -> Result<Option<f64>> {
    if value.trim() == "none" {
        Ok(None)
    } else {
        parse_float(key, value).map(Some)
    }
}

fn parse_floats(key: &str, value: &str) -> Result<Vec<f64>> {
    value
        .split_whitespace()
        .map(|field| parse_float(key, field))
        .collect()
}

fn assemble_covariance(n: usize, mut rows: Vec<(usize, Vec<f64>)>) -> Result<Array2<f64>> {
    if rows.len() != n {
        return Err(PriftError::ParseError(format!(
            "expected {} covariance rows, found {}",
            n,
            rows.len()
        )));
    }
    rows.sort_by_key(|(index, _)| *index);
    let mut cov = Array2::zeros((n, n));
    for (expected, (index, row)) in rows.into_iter().enumerate() {
        if index != expected {
            return Err(PriftError::ParseError(format!(
                "covariance row {} missing",
                expected
            )));
        }
        if row.len() != n {
            return Err(PriftError::ParseError(format!(
                "covariance row {} has {} entries, expected {}",
                index,
                row.len(),
                n
            )));
        }
        for (j, value) in row.into_iter().enumerate() {
            cov[[expected, j]] = value;
        }
    }
    Ok(cov)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn populated_invertor() -> Invertor {
        let mut inv = Invertor::new();
        inv.set_d_max(123.456789).unwrap();
        inv.set_alpha(7.3e-4).unwrap();
        inv.set_background(0.125);
        inv.set_est_bck(false);
        inv.set_data(
            array![0.011, 0.022, 0.033],
            array![10.5, 8.25, 6.0],
            array![0.5, 0.4, 0.3],
        )
        .unwrap();
        inv.set_q_min(Some(0.015));
        inv.set_slit_height(0.02).unwrap();
        inv
    }

    #[test]
    fn test_round_trip_without_result() {
        let inv = populated_invertor();
        let restored = parse_state(&render_state(&inv)).unwrap();

        assert_eq!(restored.d_max(), 123.456789);
        assert_eq!(restored.alpha(), 7.3e-4);
        assert_eq!(restored.background(), 0.125);
        assert_eq!(restored.q_min(), Some(0.015));
        assert_eq!(restored.q_max(), None);
        assert_eq!(restored.slit_height(), 0.02);
        assert_eq!(restored.npts(), 3);
        assert_eq!(restored.data().x()[2], 0.033);
        assert_eq!(restored.data().err()[1], 0.4);
        assert!(restored.result().is_none());
    }

    #[test]
    fn test_round_trip_with_result_is_exact() {
        let mut inv = populated_invertor();
        inv.lstsq(4).unwrap();
        let original = inv.result().unwrap().clone();

        let restored = parse_state(&render_state(&inv)).unwrap();
        let result = restored.result().unwrap();

        assert_eq!(result.out, original.out);
        assert_eq!(result.cov, original.cov);
        assert_eq!(result.chi2, original.chi2);
        assert_eq!(result.elapsed, original.elapsed);
    }

    #[test]
    fn test_nan_chi2_round_trips() {
        let mut inv = populated_invertor();
        inv.set_result(Some(InversionResult {
            out: array![1.0, 2.0],
            cov: Array2::eye(2),
            chi2: f64::NAN,
            elapsed: 0.5,
        }));
        let restored = parse_state(&render_state(&inv)).unwrap();
        assert!(restored.result().unwrap().chi2.is_nan());
    }

    #[test]
    fn test_rejects_missing_version() {
        let err = parse_state("#d_max=100\n").unwrap_err();
        assert!(matches!(err, PriftError::ParseError(_)));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let err = parse_state("#prift_state=99\n#d_max=100\n").unwrap_err();
        assert!(matches!(err, PriftError::ParseError(_)));
    }

    #[test]
    fn test_rejects_malformed_float() {
        let text = "#prift_state=1\n#d_max=abc\n";
        assert!(matches!(
            parse_state(text),
            Err(PriftError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_data_block() {
        let text = "#prift_state=1\n#d_max=100\n#data=3\n0.01 1.0 0.1\n";
        let err = parse_state(text).unwrap_err();
        assert!(matches!(err, PriftError::ParseError(_)));
    }

    #[test]
    fn test_rejects_incomplete_covariance() {
        let text = "#prift_state=1\n#d_max=100\n#coef=1.0 2.0\n#cov_row_0=1.0 0.0\n";
        let err = parse_state(text).unwrap_err();
        assert!(matches!(err, PriftError::ParseError(_)));
    }

    #[test]
    fn test_ignores_unknown_keys() {
        let text = "#prift_state=1\n#d_max=100\n#future_field=7\n#data=0\n";
        let inv = parse_state(text).unwrap();
        assert_eq!(inv.d_max(), 100.0);
    }
}
