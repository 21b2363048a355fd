pub mod identity;
pub mod question;
pub mod test;
pub mod test_submission;
