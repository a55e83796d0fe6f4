//! Word list module for generating anonymous usernames.
//! Format: anonymous-noun-number (e.g., "anonymous-fox-1234")

use rand::Rng;
use rand::seq::IndexedRandom;

/// Prefix shared by every generated name.
const PREFIX: &str = "anonymous";

/// Exclusive upper bound for the numeric suffix.
const SUFFIX_BOUND: u32 = 5000;

/// Names a generated identity must never take.
pub const RESERVED_NAMES: &[&str] = &["", "anonymous", "<anonymous>", "slackbot", "admin"];

/// Nouns for name generation (animals and small objects).
const NOUNS: &[&str] = &[
    "ant", "ape", "asp", "auk", "bass", "bat", "bear", "bee", "bison", "boar", "buck", "bull",
    "camel", "carp", "cat", "clam", "cod", "colt", "crab", "crane", "crow", "cub", "deer", "dingo",
    "dodo", "doe", "dog", "dove", "duck", "eagle", "eel", "elk", "emu", "ewe", "falcon", "fawn",
    "ferret", "finch", "fish", "flea", "fly", "fox", "frog", "gator", "gecko", "gnat", "gnu",
    "goat", "goose", "grouse", "gull", "hare", "hawk", "hen", "heron", "hog", "horse", "hound",
    "ibex", "ibis", "jackal", "jay", "kite", "kiwi", "koala", "koi", "lamb", "lark", "lemur",
    "lion", "llama", "lynx", "mink", "mole", "moose", "moth", "mouse", "mule", "newt", "okapi",
    "orca", "otter", "owl", "ox", "panda", "pig", "pike", "pony", "puma", "quail", "ram", "rat",
    "raven", "robin", "rook", "seal", "shark", "sheep", "shrew", "skunk", "sloth", "slug",
    "snail", "snake", "sparrow", "squid", "stag", "stoat", "swan", "tapir", "teal", "tern",
    "tiger", "toad", "trout", "tuna", "viper", "vole", "wasp", "whale", "wolf", "wombat", "wren",
    "yak", "zebra",
];

/// Generate a random human-readable username.
///
/// Never returns a name listed in [`RESERVED_NAMES`].
pub fn random_username<R: Rng>(rng: &mut R) -> String {
    loop {
        let noun = NOUNS.choose(rng).copied().unwrap_or("fox");
        let suffix = rng.random_range(0..SUFFIX_BOUND);
        let name = format!("{PREFIX}-{noun}-{suffix}");
        if !is_reserved(&name) {
            return name;
        }
    }
}

/// Check whether a name is reserved.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}
