//! Launch-description parser for simulated pipelines.
//!
//! Grammar:
//!
//! ```text
//! chain := item ( '!' item )*
//! item  := NAME ( '[' chain? ']' )?
//! NAME  := [A-Za-z0-9_.:-]+
//! ```
//!
//! A bracketed item becomes a nested [`SimBin`]; bare names become
//! [`SimElement`]s. The whole chain is wrapped in a bin named `pipeline`.

use std::sync::Arc;

use crate::element::{Bin, Element};
use crate::error::{GraphError, Result};
use crate::sim::{SimBin, SimElement};

/// Builds a simulated pipeline from a launch description.
pub fn parse_launch(description: &str) -> Result<Arc<SimBin>> {
    let mut parser = Parser {
        src: description.as_bytes(),
        pos: 0,
    };
    let pipeline = SimBin::new("pipeline");
    parser.chain(&pipeline)?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    if pipeline.children().is_empty() {
        return Err(parser.error("empty pipeline description"));
    }
    Ok(pipeline)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> GraphError {
        GraphError::Launch {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn chain(&mut self, bin: &Arc<SimBin>) -> Result<()> {
        if matches!(self.peek(), None | Some(b']')) {
            return Ok(());
        }
        loop {
            let item = self.item()?;
            bin.add(item)?;
            match self.peek() {
                Some(b'!') => self.pos += 1,
                _ => return Ok(()),
            }
        }
    }

    fn item(&mut self) -> Result<Arc<dyn Element>> {
        let name = self.name()?;
        if self.peek() != Some(b'[') {
            return Ok(SimElement::new(name));
        }
        self.pos += 1;
        let bin = SimBin::new(name);
        self.chain(&bin)?;
        if self.peek() != Some(b']') {
            return Err(self.error("expected ']'"));
        }
        self.pos += 1;
        Ok(bin)
    }

    fn name(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b':' | b'-') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected element name"));
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Bin;

    #[test]
    fn test_flat_chain() {
        let p = parse_launch("src ! conv ! sink").unwrap();
        let names: Vec<String> = p.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["src", "conv", "sink"]);
    }

    #[test]
    fn test_nested_bins() {
        let p = parse_launch("src ! dec[ parse ! inner[ a ] ] ! sink").unwrap();
        let dec = p.child_by_name("dec").unwrap();
        let dec = dec.as_bin().unwrap();
        assert_eq!(dec.children().len(), 2);
        let inner = dec.children()[1].clone().as_bin().unwrap();
        assert_eq!(inner.children()[0].name(), "a");
    }

    #[test]
    fn test_empty_nested_bin() {
        let p = parse_launch("holder[ ]").unwrap();
        let holder = p.children()[0].clone().as_bin().unwrap();
        assert!(holder.children().is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_launch(""), Err(GraphError::Launch { .. })));
        assert!(matches!(parse_launch("a ! "), Err(GraphError::Launch { .. })));
        assert!(matches!(parse_launch("a[ b"), Err(GraphError::Launch { .. })));
        assert!(matches!(
            parse_launch("a ! a"),
            Err(GraphError::DuplicateChild { .. })
        ));
    }
}
