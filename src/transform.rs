//! Local text formatting conversions (no AI call)

/// A character-level conversion applied to the whole input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMethod {
    /// Map ASCII letters into a Unicode letter block starting at `lowercase_a`;
    /// the block's uppercase letters sit 26 code points earlier.
    Shift { lowercase_a: u32 },
    /// Append a combining mark after every non-whitespace character
    Mark { combining: char },
}

impl ConversionMethod {
    /// Mathematical sans-serif bold
    pub const BOLD: ConversionMethod = ConversionMethod::Shift { lowercase_a: 0x1D5EE };
    /// Mathematical sans-serif italic
    pub const ITALIC: ConversionMethod = ConversionMethod::Shift { lowercase_a: 0x1D622 };
    pub const CROSSOUT: ConversionMethod = ConversionMethod::Mark { combining: '\u{0336}' };
    pub const UNDERLINE: ConversionMethod = ConversionMethod::Mark { combining: '\u{0332}' };

    pub fn parse(name: &str) -> Option<ConversionMethod> {
        match name.to_ascii_lowercase().as_str() {
            "bold" => Some(Self::BOLD),
            "italic" => Some(Self::ITALIC),
            "crossout" | "strike" => Some(Self::CROSSOUT),
            "underline" => Some(Self::UNDERLINE),
            _ => None,
        }
    }

    pub fn convert(&self, text: &str) -> String {
        match *self {
            ConversionMethod::Shift { lowercase_a } => text
                .chars()
                .map(|c| shift_letter(c, lowercase_a))
                .collect(),
            ConversionMethod::Mark { combining } => {
                let mut out = String::with_capacity(text.len() * 2);
                for c in text.chars() {
                    out.push(c);
                    if !c.is_whitespace() {
                        out.push(combining);
                    }
                }
                out
            }
        }
    }
}

fn shift_letter(c: char, lowercase_a: u32) -> char {
    let target = if c.is_ascii_lowercase() {
        lowercase_a + (c as u32 - 'a' as u32)
    } else if c.is_ascii_uppercase() {
        lowercase_a - 26 + (c as u32 - 'A' as u32)
    } else {
        return c;
    };
    char::from_u32(target).unwrap_or(c)
}
