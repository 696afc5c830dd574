mod tests_btree;
mod tests_rbtree;
