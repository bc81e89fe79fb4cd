pub mod admin;
pub mod audit;
pub mod health;

#[cfg(test)]
mod test_support;
