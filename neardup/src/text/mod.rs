mod multi_shingles;
mod tokenizers;

pub use self::multi_shingles::{AsShingles, MultiShingles};
pub use self::tokenizers::preprocess;
pub use self::tokenizers::tokenize_text;
