// Pipeline processing: schema drift, cleaning, scoring, aggregation and gating

pub mod aggregate;
pub mod normalize;
pub mod quality_gate;
pub mod schema;
pub mod scorer;
