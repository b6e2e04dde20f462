pub mod infrastructure_dto;
