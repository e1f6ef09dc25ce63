pub mod jenkins;

pub use jenkins::{JenkinsClient, JenkinsProvider};
