pub mod submission_dto;
pub mod test_dto;
