//! Centered terminal text

use std::io::{self, Stdout, Write};

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};
use keycast_core::Renderer;

/// Where a line of text goes on a `width` x `height` surface.
#[derive(Debug, PartialEq, Eq)]
pub struct Placement<'a> {
    pub column: u16,
    pub row: u16,
    /// The text, clipped to the surface width
    pub text: &'a str,
}

pub fn layout(width: u16, height: u16, text: &str) -> Placement<'_> {
    let text = match text.char_indices().nth(usize::from(width)) {
        Some((end, _)) => &text[..end],
        None => text,
    };
    let len = u16::try_from(text.chars().count()).unwrap_or(width);

    Placement {
        column: width.saturating_sub(len) / 2,
        row: height / 2,
        text,
    }
}

type SizeFn = fn() -> io::Result<(u16, u16)>;

/// Draws each combination centered on a cleared screen.
pub struct TerminalRenderer<W> {
    out: W,
    size: SizeFn,
}

impl TerminalRenderer<Stdout> {
    pub fn stdout() -> Self {
        Self::with_size(io::stdout(), terminal::size)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn with_size(out: W, size: SizeFn) -> Self {
        Self { out, size }
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn display(&mut self, text: &str) -> io::Result<()> {
        let (width, height) = (self.size)()?;
        let placement = layout(width, height, text);

        queue!(
            self.out,
            Clear(ClearType::All),
            MoveTo(placement.column, placement.row),
            SetForegroundColor(Color::White),
            Print(placement.text),
            ResetColor
        )?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_80x24() -> io::Result<(u16, u16)> {
        Ok((80, 24))
    }

    fn broken() -> io::Result<(u16, u16)> {
        Err(io::Error::new(io::ErrorKind::Other, "no tty"))
    }

    #[test]
    fn test_layout_centers_text() {
        assert_eq!(
            layout(80, 24, "A + CTRL"),
            Placement {
                column: 36,
                row: 12,
                text: "A + CTRL"
            }
        );
    }

    #[test]
    fn test_layout_clips_to_width() {
        let placement = layout(5, 3, "MOUSE LEFT CLICK");
        assert_eq!(placement.text, "MOUSE");
        assert_eq!(placement.column, 0);
        assert_eq!(placement.row, 1);
    }

    #[test]
    fn test_layout_clips_on_char_boundary() {
        let placement = layout(2, 1, "ÄÖÜ");
        assert_eq!(placement.text, "ÄÖ");
    }

    #[test]
    fn test_layout_zero_sized_surface() {
        assert_eq!(
            layout(0, 0, "A"),
            Placement {
                column: 0,
                row: 0,
                text: ""
            }
        );
    }

    #[test]
    fn test_layout_empty_text() {
        let placement = layout(80, 24, "");
        assert_eq!(placement.column, 40);
        assert_eq!(placement.text, "");
    }

    #[test]
    fn test_display_writes_centered_text() {
        let mut renderer = TerminalRenderer::with_size(Vec::new(), fixed_80x24);

        renderer.display("CTRL").unwrap();

        let written = String::from_utf8(renderer.out).unwrap();
        // MoveTo is 1-based on the wire: row 13, column 39
        assert!(written.contains("\x1b[13;39H"));
        assert!(written.contains("CTRL"));
    }

    #[test]
    fn test_display_propagates_size_error() {
        let mut renderer = TerminalRenderer::with_size(Vec::new(), broken);
        assert!(renderer.display("A").is_err());
        assert!(renderer.out.is_empty());
    }
}
