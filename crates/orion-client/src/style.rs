//! Terminal colors, disabled by `NO_COLOR`.

pub fn color_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

#[derive(Debug, Clone, Copy)]
pub struct Style {
    enabled: bool,
}

impl Default for Style {
    fn default() -> Self {
        Self::new()
    }
}

impl Style {
    pub fn new() -> Self {
        Self {
            enabled: color_enabled(),
        }
    }

    /// Colors on regardless of the environment (for tests).
    pub fn force_enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    fn code(&self, escape: &'static str) -> &'static str {
        if self.enabled {
            escape
        } else {
            ""
        }
    }

    pub fn dim(&self) -> &'static str {
        self.code("\x1b[2m")
    }

    pub fn bold_cyan(&self) -> &'static str {
        self.code("\x1b[1;36m")
    }

    pub fn yellow(&self) -> &'static str {
        self.code("\x1b[33m")
    }

    pub fn reset(&self) -> &'static str {
        self.code("\x1b[0m")
    }

    /// Erase the current line.
    pub fn clear_line(&self) -> &'static str {
        self.code("\x1b[2K")
    }
}
