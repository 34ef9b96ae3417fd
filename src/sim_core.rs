//! Shared helpers: sample statistics, prompt input for interactive mode,
//! report timestamps.

use std::io::{self, BufRead, Write};

// ============================================================================
// STATISTICAL HELPERS
// ============================================================================

/// Arithmetic mean, `None` for an empty slice
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Unbiased sample variance (n - 1), `None` below two observations
pub fn sample_variance(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let m = mean(data)?;
    let ss: f64 = data.iter().map(|x| (x - m).powi(2)).sum();
    Some(ss / (data.len() - 1) as f64)
}

/// Report timestamp, UTC
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string()
}

// ============================================================================
// INPUT HELPERS
// ============================================================================

fn read_line<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> io::Result<String> {
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut buffer = String::new();
    if input.read_line(&mut buffer)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
    }
    Ok(buffer.trim().to_string())
}

/// Prompt until a non-negative integer is entered; empty input takes `default`
pub fn get_input_u32<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str, default: u32) -> io::Result<u32> {
    loop {
        let line = read_line(input, out, prompt)?;
        if line.is_empty() {
            return Ok(default);
        }
        match line.parse::<u32>() {
            Ok(n) => return Ok(n),
            Err(_) => writeln!(out, "Invalid number.")?,
        }
    }
}

/// Optional u64 (empty = None)
pub fn get_optional_u64<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> io::Result<Option<u64>> {
    loop {
        let line = read_line(input, out, prompt)?;
        if line.is_empty() {
            return Ok(None);
        }
        match line.parse::<u64>() {
            Ok(n) => return Ok(Some(n)),
            Err(_) => writeln!(out, "Invalid number.")?,
        }
    }
}

/// Yes/no; empty input takes `default`
pub fn get_bool<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str, default: bool) -> io::Result<bool> {
    loop {
        let line = read_line(input, out, &format!("{} (y/n): ", prompt))?;
        match line.to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(out, "Please type 'y' or 'n'.")?,
        }
    }
}
