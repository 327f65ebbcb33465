// besim: workspace root package.
// Carries no code of its own — it exists so `tests/integration/*.rs`
// can exercise the library crates together as `cargo test` integration
// tests.
