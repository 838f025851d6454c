mod cancellation;
mod completion;
