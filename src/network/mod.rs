pub mod node;
pub mod transport;

pub use node::*;
pub use transport::*;

/*
    Delivery is point-to-point and reliable between correct peers. A
    "broadcast" is the sender delivering the same message to every other
    member in turn. Nothing here retries; a round that loses messages simply
    times out.
*/
