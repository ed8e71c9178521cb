use ratatui::style::Color;

pub const ACCENT: Color = Color::Rgb(100, 149, 237);
pub const SUCCESS: Color = Color::Rgb(134, 194, 156);
pub const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
pub const INFO: Color = Color::Rgb(147, 180, 220);
pub const INFO_DIM: Color = Color::Rgb(90, 110, 140);
pub const WARN: Color = Color::Rgb(220, 180, 130);
pub const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
pub const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
pub const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
pub const BORDER: Color = Color::Rgb(60, 60, 65);
pub const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);
