pub mod gbdt;
pub mod knn;
pub mod majority;
pub mod ridge;

pub mod factory;
pub mod learner_trait;
