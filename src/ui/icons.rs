//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Run indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
pub static PAUSED: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSE]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
