mod assignment_flow;
mod async_callbacks;
mod constraints;
mod lifecycle;
mod unassign_and_delete;
