//! Validating cursor over a flat argument list.

use crate::codec::Variant;
use crate::error::{DebugWireError, Result};

/// Sequential reader that checks the remaining length before consuming.
///
/// Every record decoder calls [`ArgReader::require`] before each block of
/// fields and [`ArgReader::finish`] at the end, so a truncated or extended
/// argument list is rejected as a whole.
pub struct ArgReader<'a> {
    what: &'static str,
    args: &'a [Variant],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    /// Create a reader. `what` names the record in error messages.
    pub fn new(what: &'static str, args: &'a [Variant]) -> Self {
        Self { what, args, pos: 0 }
    }

    /// Number of values not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }

    /// Fail with `Malformed` unless at least `count` values remain.
    pub fn require(&self, count: usize) -> Result<()> {
        if self.remaining() < count {
            return Err(DebugWireError::too_short(self.what, count, self.remaining()));
        }
        Ok(())
    }

    /// Fail with `Malformed` unless `count` items of `width` values each remain.
    pub fn require_items(&self, count: usize, width: usize) -> Result<()> {
        let needed = count.checked_mul(width).ok_or_else(|| {
            DebugWireError::Malformed(format!(
                "Malformed {} message, item count {} out of range",
                self.what, count
            ))
        })?;
        self.require(needed)
    }

    fn next(&mut self) -> Result<&'a Variant> {
        self.require(1)?;
        let value = &self.args[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn mismatch(&self, expected: &str, got: &Variant) -> DebugWireError {
        DebugWireError::Malformed(format!(
            "Malformed {} message, expected {} at position {}, got {}",
            self.what,
            expected,
            self.pos - 1,
            got.type_name()
        ))
    }

    /// Next value, whatever its type.
    pub fn value(&mut self) -> Result<Variant> {
        Ok(self.next()?.clone())
    }

    pub fn int(&mut self) -> Result<i64> {
        let value = self.next()?;
        value.as_int().ok_or_else(|| self.mismatch("int", value))
    }

    /// Next value as an `i32`. Out-of-range integers are malformed.
    pub fn i32(&mut self) -> Result<i32> {
        let value = self.int()?;
        i32::try_from(value).map_err(|_| {
            DebugWireError::Malformed(format!(
                "Malformed {} message, integer {} out of range",
                self.what, value
            ))
        })
    }

    /// Next value as a non-negative element count.
    pub fn count(&mut self) -> Result<usize> {
        let value = self.int()?;
        usize::try_from(value).map_err(|_| {
            DebugWireError::Malformed(format!(
                "Malformed {} message, negative count {}",
                self.what, value
            ))
        })
    }

    pub fn float(&mut self) -> Result<f64> {
        let value = self.next()?;
        value.as_float().ok_or_else(|| self.mismatch("float", value))
    }

    pub fn bool(&mut self) -> Result<bool> {
        let value = self.next()?;
        value.as_bool().ok_or_else(|| self.mismatch("bool", value))
    }

    pub fn string(&mut self) -> Result<String> {
        let value = self.next()?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch("string", value))
    }

    /// All values not yet consumed.
    pub fn rest(&mut self) -> &'a [Variant] {
        let rest = &self.args[self.pos..];
        self.pos = self.args.len();
        rest
    }

    /// Fail with `Malformed` if any value was left unread.
    pub fn finish(self) -> Result<()> {
        if self.remaining() > 0 {
            return Err(DebugWireError::too_long(self.what, self.remaining()));
        }
        Ok(())
    }
}
