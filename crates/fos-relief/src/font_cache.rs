//! Font data and glyph width cache.

use crate::services::FontCache;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct FontEntry {
    bytes: usize,
    last_used: Instant,
}

/// Loaded font data plus measured glyph widths.
pub struct GlyphCache {
    inactivity: Duration,
    fonts: Mutex<HashMap<String, FontEntry>>,
    widths: Mutex<HashMap<(String, char), f32>>,
}

impl GlyphCache {
    /// Fonts idle for at least `inactivity` are purged as inactive.
    pub fn new(inactivity: Duration) -> Self {
        Self {
            inactivity,
            fonts: Mutex::new(HashMap::new()),
            widths: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_font(&self, family: impl Into<String>, bytes: usize) {
        self.fonts.lock().unwrap_or_else(PoisonError::into_inner).insert(
            family.into(),
            FontEntry {
                bytes,
                last_used: Instant::now(),
            },
        );
    }

    /// Mark a font as used. Returns false if it is not loaded.
    pub fn touch(&self, family: &str) -> bool {
        match self
            .fonts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(family)
        {
            Some(entry) => {
                entry.last_used = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn record_width(&self, family: impl Into<String>, glyph: char, width: f32) {
        self.widths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((family.into(), glyph), width);
    }

    pub fn width(&self, family: &str, glyph: char) -> Option<f32> {
        self.widths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(family.to_string(), glyph))
            .copied()
    }

    pub fn font_count(&self) -> usize {
        self.fonts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn width_count(&self) -> usize {
        self.widths.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Purge fonts idle for at least the inactivity window as of `now`.
    pub fn purge_inactive_at(&self, now: Instant) -> usize {
        let mut fonts = self.fonts.lock().unwrap_or_else(PoisonError::into_inner);
        let before = fonts.len();
        let mut freed = 0;
        fonts.retain(|_, entry| {
            let keep = now.saturating_duration_since(entry.last_used) < self.inactivity;
            if !keep {
                freed += entry.bytes;
            }
            keep
        });

        let purged = before - fonts.len();
        if purged > 0 {
            debug!(purged, freed, "Purged inactive font data");
        }
        purged
    }
}

impl FontCache for GlyphCache {
    fn purge_inactive_font_data(&self) {
        self.purge_inactive_at(Instant::now());
    }

    fn clear_width_caches(&self) {
        self.widths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
