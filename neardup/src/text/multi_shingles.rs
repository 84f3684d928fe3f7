/// Iterator over shingles (n-grams) of every size in `min_size..=max_size`.
///
/// For each start position the shingles are produced from the shortest to the
/// longest, then the window moves one element forward. Iteration stops at the
/// first start position that cannot hold a shingle of the current size.
///
/// Works on slices (word shingles over a token list) and on `str`
/// (character shingles, respecting char boundaries).
#[derive(Clone)]
pub struct MultiShingles<'a, T: ?Sized + 'a> {
    data: &'a T,
    min_size: usize,
    max_size: usize,
    size: usize,
}

impl<'a, T: ?Sized> MultiShingles<'a, T> {
    pub fn new(data: &'a T, min_size: usize, max_size: usize) -> Self {
        assert!(
            min_size > 0 && min_size <= max_size,
            "invalid shingle size range {}..={}",
            min_size,
            max_size
        );
        MultiShingles {
            data,
            min_size,
            max_size,
            size: min_size,
        }
    }

    /// Moves on to the next shingle size. Returns true when the sizes wrapped
    /// around and the window has to slide forward.
    #[inline]
    fn next_size(&mut self) -> bool {
        self.size += 1;
        if self.size > self.max_size {
            self.size = self.min_size;
            true
        } else {
            false
        }
    }
}

impl<'a, T> Iterator for MultiShingles<'a, [T]> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        let shingle = self.data.get(..self.size)?;
        if self.next_size() {
            self.data = &self.data[1..];
        }
        Some(shingle)
    }
}

impl<'a> Iterator for MultiShingles<'a, str> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;
        // byte offsets of every char start, followed by the end of the data
        let mut offsets = data
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(data.len()));
        let end = offsets.clone().nth(self.size)?;
        let next_start = offsets.nth(1).unwrap_or(data.len());
        if self.next_size() {
            self.data = &data[next_start..];
        }
        Some(&data[..end])
    }
}

pub trait AsShingles<'a, T: ?Sized + 'a> {
    fn as_shingles(&'a self, min_size: usize, max_size: usize) -> MultiShingles<'a, T>;
}

impl<'a, T: 'a> AsShingles<'a, [T]> for [T] {
    fn as_shingles(&'a self, min_size: usize, max_size: usize) -> MultiShingles<'a, [T]> {
        MultiShingles::new(self, min_size, max_size)
    }
}

impl<'a> AsShingles<'a, str> for str {
    fn as_shingles(&'a self, min_size: usize, max_size: usize) -> MultiShingles<'a, str> {
        MultiShingles::new(self, min_size, max_size)
    }
}
