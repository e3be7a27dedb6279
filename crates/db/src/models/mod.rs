pub mod product;
pub mod wishlist_item;
