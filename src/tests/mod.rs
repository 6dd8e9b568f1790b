//! Cross-module integration tests. Most behavior is covered closer to the
//! code that implements it (`#[cfg(test)]` modules in `core`, `adapters`,
//! etc.); this tree is for tests that span more than one of those.

#[cfg(test)]
mod test_helpers;
