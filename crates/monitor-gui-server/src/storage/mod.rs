mod local;

pub use local::LocalSessionStorage;
