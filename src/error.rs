use std::fmt;
use std::rc::Rc;

use crate::context::ContextManager;
use crate::reducer::Rule;

/// A byte-offset span into a logical source file, plus the file's logical
/// name. This is the sole input to diagnostic line/column computation; the
/// front-end performs that computation lazily (see [`Error::describe`])
/// rather than at the point an error is raised, since by the time an error
/// surfaces from the evaluator or code generator the statement stream has
/// already been flattened across however many included files contributed
/// to it, and only the position itself still knows which one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pos {
    pub start: usize,
    pub end: usize,
    pub context: Rc<str>,
}

impl Pos {
    pub fn new(start: usize, end: usize, context: Rc<str>) -> Self {
        Pos { start, end, context }
    }

    /// A position with no real source behind it, used for synthetic nodes:
    /// macro parameter `Define`s built from the call site, and the
    /// implicit `byte`/`word`/`long` bindings installed at compilation
    /// start.
    pub fn synthetic() -> Self {
        Pos { start: 0, end: 0, context: Rc::from("<synthetic>") }
    }

    /// 1-based (line, column) within `text`, counting newlines up to
    /// `start`.
    pub fn line_col(&self, text: &str) -> (usize, usize) {
        let start = self.start.min(text.len());
        let line = text[..start].matches('\n').count() + 1;
        let column = match text[..start].rfind('\n') {
            Some(idx) => start - idx,
            None => start + 1,
        };
        (line, column)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}]", self.context, self.start, self.end)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot find \"{name}\" on any configured search path")]
    FileNotFound { name: String },

    #[error("{pos}: {message}")]
    ParseError { pos: Pos, message: String },

    #[error("{pos}: invalid escape sequence '\\{ch}'")]
    InvalidEscape { pos: Pos, ch: char },

    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Pos },

    #[error("{pos}: macro \"{name}\" is already defined at {prior_pos}")]
    DuplicateMacro { pos: Pos, name: String, prior_pos: Pos },

    #[error(
        "{pos}: invalid number of arguments for macro \"{name}\"; expected {expected}, got {got}"
    )]
    ArityMismatch { pos: Pos, name: String, expected: usize, got: usize },

    #[error("{pos}: identifier \"{name}\" is already defined in scope")]
    DuplicateName { pos: Pos, name: String },

    #[error("{pos}: identifier {name} is undefined")]
    UndefinedName { pos: Pos, name: String },

    #[error("{pos}: cyclic reference when evaluating expression")]
    CyclicReference { pos: Pos },

    #[error("{pos}: invalid string codec \"{name}\"")]
    InvalidEncoding { pos: Pos, name: String },

    #[error("{pos}: {message}")]
    EncodingError { pos: Pos, message: String },

    #[error("{pos}: relative branch for {mnemonic} is out of range")]
    BranchOutOfRange { pos: Pos, mnemonic: String },

    #[error("{pos}: operation cannot take a 16 bit value")]
    AddressRangeError { pos: Pos },

    #[error("{pos}: expression evaluates to {len} bytes; operations can only take up to 2")]
    OperandTooLarge { pos: Pos, len: usize },

    #[error("{pos}: unresolved forward reference")]
    UnresolvedFixup { pos: Pos },

    #[error(transparent)]
    Grammar(#[from] Box<pest::error::Error<Rule>>),
}

impl Error {
    /// The position this error is anchored to, if any. `FileNotFound` and
    /// a boxed grammar failure (which already carries its own
    /// line/column) have none.
    pub fn pos(&self) -> Option<&Pos> {
        match self {
            Error::FileNotFound { .. } | Error::Grammar(_) => None,
            Error::ParseError { pos, .. }
            | Error::InvalidEscape { pos, .. }
            | Error::UnterminatedString { pos }
            | Error::DuplicateMacro { pos, .. }
            | Error::ArityMismatch { pos, .. }
            | Error::DuplicateName { pos, .. }
            | Error::UndefinedName { pos, .. }
            | Error::CyclicReference { pos }
            | Error::InvalidEncoding { pos, .. }
            | Error::EncodingError { pos, .. }
            | Error::BranchOutOfRange { pos, .. }
            | Error::AddressRangeError { pos }
            | Error::OperandTooLarge { pos, .. }
            | Error::UnresolvedFixup { pos } => Some(pos),
        }
    }

    /// Renders this error in the canonical `context (line, column):
    /// message` shape, resolving line/column against `ctx`'s cached text
    /// for the position's context. Falls back to plain [`fmt::Display`]
    /// when there is no position (`FileNotFound`) or the text can no
    /// longer be located.
    pub fn describe(&self, ctx: &mut ContextManager) -> String {
        let Some(pos) = self.pos() else {
            return self.to_string();
        };
        match ctx.get_text(&pos.context) {
            Ok(text) => {
                let (line, column) = pos.line_col(text);
                format!("{} ({}, {}): {}", pos.context, line, column, self.message())
            }
            Err(_) => format!("{}: {}", pos.context, self.message()),
        }
    }

    /// This error's message with the leading `{pos}: ` prefix stripped
    /// (every variant's `Display` includes it, since `thiserror` needs a
    /// self-contained format string per variant).
    fn message(&self) -> String {
        let full = self.to_string();
        match self.pos() {
            Some(pos) => {
                let prefix = format!("{}: ", pos);
                full.strip_prefix(prefix.as_str()).map(str::to_owned).unwrap_or(full)
            }
            None => full,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
