/// Version prefix every API route is mounted under.
pub const API_PREFIX: &str = "/v1";
