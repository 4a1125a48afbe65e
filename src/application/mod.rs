pub mod copy_move;
