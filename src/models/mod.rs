pub mod allow_list;
pub mod form_data;
pub mod user;
