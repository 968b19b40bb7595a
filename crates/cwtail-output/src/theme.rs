use crossterm::style::Color;

/// Color theme for terminal output
pub struct Theme;

impl Theme {
    // Token highlighting
    pub const INCLUDE: Color = Color::Green;
    pub const HIGHLIGHT: Color = Color::Cyan;

    // Banner
    pub const BANNER: Color = Color::DarkGrey;

    /// 256-colour palette cycled through as new streams appear
    pub const STREAM_PALETTE: [Color; 13] = [
        Color::AnsiValue(28),  // rgb(0,135,0)
        Color::AnsiValue(136), // rgb(175,135,0)
        Color::AnsiValue(90),  // rgb(135,0,135)
        Color::AnsiValue(31),  // rgb(0,135,175)
        Color::AnsiValue(168), // rgb(215,95,135)
        Color::AnsiValue(73),  // rgb(95,175,175)
        Color::AnsiValue(61),  // rgb(95,95,175)
        Color::AnsiValue(216), // rgb(255,175,135)
        Color::AnsiValue(24),  // rgb(0,95,135)
        Color::AnsiValue(184), // rgb(215,215,0)
        Color::AnsiValue(31),  // rgb(0,135,175)
        Color::AnsiValue(209), // rgb(255,135,95)
        Color::AnsiValue(93),  // rgb(87,87,255)
    ];

    /// Colour for the n-th distinct stream
    pub fn stream_color(index: usize) -> Color {
        Self::STREAM_PALETTE[index % Self::STREAM_PALETTE.len()]
    }
}
