//! Client-side halves of the sync core: the follower that keeps a local
//! copy of the poll list current, and the advisory duplicate vote guard.

mod follower;
mod guard;

pub use follower::*;
pub use guard::*;
