//! Default avatar palette for organizations and projects created without one.

use rand::seq::SliceRandom;

pub const AVATAR_COLORS: &[&str] = &[
    "#ef4444", "#f97316", "#f59e0b", "#84cc16", "#10b981", "#14b8a6", "#06b6d4", "#3b82f6",
    "#6366f1", "#8b5cf6", "#d946ef", "#ec4899",
];

pub const AVATAR_ICONS: &[&str] = &[
    "rocket", "star", "briefcase", "flag", "globe", "heart", "lightning", "puzzle", "target",
    "trophy", "book", "compass",
];

pub fn random_color() -> String {
    pick(AVATAR_COLORS)
}

pub fn random_icon() -> String {
    pick(AVATAR_ICONS)
}

fn pick(options: &[&str]) -> String {
    options
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_come_from_the_palette() {
        for _ in 0..20 {
            assert!(AVATAR_COLORS.contains(&random_color().as_str()));
            assert!(AVATAR_ICONS.contains(&random_icon().as_str()));
        }
    }
}
