//! Subject-facing instruction texts.

use cuex_core::{Modality, TestCondition};

pub fn crosshair_instructions() -> &'static str {
    "In a moment a cross will appear in the middle of the screen.\n\n\
     Please keep your eyes on the cross and relax until it disappears."
}

pub fn main_instructions(test: TestCondition) -> String {
    let mut text = String::new();
    match test.modality() {
        Modality::Passive => {
            text.push_str("You will now see a series of images.\n");
            text.push_str("Please look at each image for as long as it is on the screen.\n");
            if test.uses_olfactory() {
                text.push_str("While the images are shown you may notice a scent.\n");
            }
            if test.uses_tactile() {
                text.push_str("Before each image you will be asked to touch the object in front of you.\n");
            }
        }
        Modality::Stroop => {
            text.push_str("You will now see a series of images.\n");
            if test.uses_tactile() {
                text.push_str("Before each image, touch the object in front of you.\n");
                text.push_str("Then decide whether the object matches the image.\n");
            } else {
                text.push_str("Decide whether the scent matches the image.\n");
            }
            text.push_str("\nY = Yes     N = No\n");
        }
    }
    text.push_str("\nPress SPACE to begin.");
    text
}

pub fn stroop_prompt() -> &'static str {
    "Does it match?\n\nY = Yes     N = No"
}

pub fn touch_instructions(initial: bool) -> &'static str {
    if initial {
        "Please touch the object in front of you to begin."
    } else {
        "Please touch the next object."
    }
}

pub fn post_instructions() -> &'static str {
    "This part of the experiment is complete.\n\nThank you! Please wait for the experimenter."
}
