mod common;

mod routing;
mod tiers;
