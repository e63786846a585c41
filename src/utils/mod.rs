pub mod coordinate;
pub mod image;

#[cfg(test)]
pub(crate) mod test_utils;
