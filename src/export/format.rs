//! Low-level EGG text writing.
//!
//! EGG is a nested `<Tag> name { body }` grammar. [`EggWriter`] keeps the
//! indentation level and float precision for one document so every number
//! in a run is formatted the same way.

use crate::names::escape;
use std::fmt::{Display, Write};

/// Format a float with a fixed number of decimals. Negative zero prints as zero.
pub fn format_float(value: f32, precision: usize) -> String {
    let text = format!("{:.*}", precision, value);
    match text.strip_prefix('-') {
        Some(rest) if rest.chars().all(|c| c == '0' || c == '.') => rest.to_string(),
        _ => text,
    }
}

/// Indented EGG text builder.
pub struct EggWriter {
    out: String,
    depth: usize,
    precision: usize,
}

impl EggWriter {
    pub fn new(precision: usize) -> Self {
        Self {
            out: String::with_capacity(4096),
            depth: 0,
            precision,
        }
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn float(&self, value: f32) -> String {
        format_float(value, self.precision)
    }

    /// Space-separated floats.
    pub fn floats(&self, values: &[f32]) -> String {
        let mut text = String::with_capacity(values.len() * (self.precision + 4));
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            text.push_str(&self.float(*value));
        }
        text
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn head(tag: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("<{}> {}", tag, escape(name)),
            None => format!("<{}>", tag),
        }
    }

    /// A raw line at the current depth.
    pub fn line(&mut self, text: impl Display) {
        self.indent();
        writeln!(self.out, "{}", text).unwrap();
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Start a block: `<Tag> name {`.
    pub fn open(&mut self, tag: &str, name: Option<&str>) {
        let head = Self::head(tag, name);
        self.line(format_args!("{} {{", head));
        self.depth += 1;
    }

    /// Start a block whose name is written verbatim (already quoted or reserved).
    pub fn open_raw(&mut self, tag: &str, name: &str) {
        self.line(format_args!("<{}> {} {{", tag, name));
        self.depth += 1;
    }

    pub fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    /// A single-line block: `<Tag> name { body }`.
    pub fn leaf(&mut self, tag: &str, name: Option<&str>, body: impl Display) {
        let head = Self::head(tag, name);
        self.line(format_args!("{} {{ {} }}", head, body));
    }

    /// `<Scalar> name { value }`.
    pub fn scalar(&mut self, name: &str, value: impl Display) {
        self.leaf("Scalar", Some(name), value);
    }

    /// `<Scalar> name { value }` with float formatting.
    pub fn scalar_f(&mut self, name: &str, value: f32) {
        let value = self.float(value);
        self.scalar(name, value);
    }

    /// `<Tag> { x y z ... }` with float formatting.
    pub fn vector(&mut self, tag: &str, name: Option<&str>, values: &[f32]) {
        let body = self.floats(values);
        self.leaf(tag, name, body);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> String {
        self.out
    }
}
