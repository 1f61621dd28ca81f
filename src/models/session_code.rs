use std::collections::VecDeque;
use std::fmt::Display;
use std::str::FromStr;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

/// Symbols a session code is drawn from. `I`, `O`, `0` and `1` are left out
/// because they are easily confused when read aloud or copied by hand.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a session code.
pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("code must be 6 characters long, got {0}")]
    WrongLength(usize),

    #[error("character {0:?} is not allowed in a code")]
    InvalidCharacter(char),
}

/// The short, human-shareable identifier of one party's session.
///
/// Always exactly [`CODE_LENGTH`] uppercase symbols from [`CODE_ALPHABET`].
/// Parsing is case-insensitive and ignores surrounding whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode([u8; CODE_LENGTH]);

impl SessionCode {
    pub fn as_str(&self) -> &str {
        // only ASCII alphabet symbols are ever stored
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    fn is_code_symbol(symbol: u8) -> bool {
        CODE_ALPHABET.contains(&symbol)
    }
}

impl FromStr for SessionCode {
    type Err = CodeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase();
        let length = normalized.chars().count();
        if length != CODE_LENGTH {
            return Err(CodeError::WrongLength(length));
        }

        let mut symbols = [0u8; CODE_LENGTH];
        for (slot, c) in symbols.iter_mut().zip(normalized.chars()) {
            if !c.is_ascii() || !Self::is_code_symbol(c as u8) {
                return Err(CodeError::InvalidCharacter(c));
            }
            *slot = c as u8;
        }

        Ok(Self(symbols))
    }
}

impl TryFrom<String> for SessionCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.as_str().to_owned()
    }
}

impl Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source of fresh session codes.
pub trait CodeGenerator: Send {
    fn generate(&mut self) -> SessionCode;
}

/// Draws every symbol uniformly at random from [`CODE_ALPHABET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&mut self) -> SessionCode {
        let mut rng = rand::rng();
        let mut symbols = [0u8; CODE_LENGTH];
        for symbol in &mut symbols {
            *symbol = CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())];
        }
        SessionCode(symbols)
    }
}

/// Hands out a preset sequence of codes, falling back to random codes once
/// the sequence is used up. Lets tests and demos pin the codes a session gets.
#[derive(Debug, Clone, Default)]
pub struct FixedCodes {
    codes: VecDeque<SessionCode>,
}

impl FixedCodes {
    pub fn new(codes: impl IntoIterator<Item = SessionCode>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

impl CodeGenerator for FixedCodes {
    fn generate(&mut self) -> SessionCode {
        self.codes
            .pop_front()
            .unwrap_or_else(|| RandomCodeGenerator.generate())
    }
}
